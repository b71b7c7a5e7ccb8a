pub mod background;
pub mod client;
pub mod error;
pub mod messages;

pub use background::{BackgroundService, ChannelConverter};
pub use client::{normalize_batch, Converter, ZhConvertClient};
pub use error::{ConversionError, ConversionResult};
pub use messages::{ConvertReply, HostMessage};
