//! Infrastructure adapters for the ERP gateway.

pub mod http_transport;
