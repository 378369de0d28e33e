pub mod commands;
mod http;
mod library;
mod selector;
mod status;
mod tcp;
mod types;

pub use http::HttpStatusReader;
pub use library::RemoteLibrary;
pub use selector::{Route, TransportSelector, route};
pub use status::{DeviceStatusModel, StatusSource};
pub use tcp::{AckMode, TcpCommandChannel};
pub use types::{
    Command, CommandInfo, CommandResult, DeviceEndpoint, DeviceInfo, DeviceStatus, PowerState,
    Programme, Service, ServiceList, TransportState,
};
