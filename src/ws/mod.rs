mod channel;
mod handler;

pub use channel::WsChannel;
pub use handler::ws_handler;
