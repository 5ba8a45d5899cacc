pub mod codec;
pub mod control;
pub mod layout;
pub mod replies;
