pub mod errors;
pub mod events;
pub mod ids;
pub mod markup;
pub mod messages;
pub mod tasks;
pub mod tools;
pub mod transport;
