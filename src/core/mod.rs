pub mod builder;
pub mod oracle;
pub mod reconcile;
pub mod source;
