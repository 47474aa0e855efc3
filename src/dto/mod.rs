pub mod health;
pub mod identity;
pub mod room;
pub mod sse;
pub mod validation;
