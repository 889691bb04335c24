mod connector;

pub use connector::{AcceptedConnection, Connector, ConnectorHandle};
