pub mod cors;
pub mod dispatch;
