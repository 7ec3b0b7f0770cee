pub mod reconcile;
pub mod show;
