pub(crate) mod dispatch;
pub(crate) mod registry;
pub(crate) mod topics;
