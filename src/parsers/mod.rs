pub mod packet_parser;

pub use self::packet_parser::{PacketHeader, PacketParser, PacketType};
