pub(crate) mod connection_manager;
pub(crate) mod messages;
