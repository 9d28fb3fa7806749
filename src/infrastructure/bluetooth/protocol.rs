//! Smart Ring Protocol
//!
//! Command packets and GATT identifiers for the R02 family of smart rings.
//! Every command is a fixed 16-byte packet written to the command-write
//! characteristic; replies arrive as notifications on command-read.

use anyhow::{ensure, Result};
use tracing::trace;
use uuid::{uuid, Uuid};

/// Command service (Nordic UART style)
pub const COMMAND_SERVICE_UUID: Uuid = uuid!("6e40fff0-b5a3-f393-e0a9-e50e24dcca9e");

/// Command Write Characteristic UUID - where commands are sent
pub const COMMAND_WRITE_UUID: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Command Read Characteristic UUID - where replies are notified
pub const COMMAND_READ_UUID: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

/// Bulk transfer service used for history downloads
pub const BIG_DATA_SERVICE_UUID: Uuid = uuid!("de5bf728-d711-4e47-af26-65e3012a5dc7");
pub const BIG_DATA_WRITE_UUID: Uuid = uuid!("de5bf72a-d711-4e47-af26-65e3012a5dc7");
pub const BIG_DATA_READ_UUID: Uuid = uuid!("de5bf729-d711-4e47-af26-65e3012a5dc7");

/// Standard Device Information service and two of its characteristics
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");
pub const DEVICE_INFO_HARDWARE_UUID: Uuid = uuid!("00002a27-0000-1000-8000-00805f9b34fb");
pub const DEVICE_INFO_FIRMWARE_UUID: Uuid = uuid!("00002a26-0000-1000-8000-00805f9b34fb");

/// Fixed size of every command packet
pub const PACKET_LEN: usize = 16;

/// Maximum payload bytes between the command id and the checksum
pub const MAX_PAYLOAD_LEN: usize = PACKET_LEN - 1;

/// Camera requests
pub const CMD_CAMERA: u8 = 0x02;

/// Blink the ring's LED twice
pub const CMD_BLINK_TWICE: u8 = 0x0F;

/// Camera sub-commands, sent as the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CameraAction {
    IntoCameraUi = 1,
    TakePhoto = 2,
    Finish = 3,
    /// Ring starts reporting the "take photo" gesture
    EnableCameraGesture = 4,
    KeepScreenOn = 5,
    DisableCameraGesture = 6,
}

impl CameraAction {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::IntoCameraUi),
            2 => Some(Self::TakePhoto),
            3 => Some(Self::Finish),
            4 => Some(Self::EnableCameraGesture),
            5 => Some(Self::KeepScreenOn),
            6 => Some(Self::DisableCameraGesture),
            _ => None,
        }
    }
}

/// Low byte of the sum of the first 15 bytes
fn checksum(bytes: &[u8]) -> u8 {
    bytes[..MAX_PAYLOAD_LEN]
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Build a command packet
///
/// # Packet Structure (16 bytes)
///
/// ```text
/// [0]     : Command id
/// [1-14]  : Payload, zero padded
/// [15]    : Checksum (sum of bytes 0-14, low byte)
/// ```
///
/// The payload may be up to 15 bytes; a 15th byte lands in the checksum
/// slot and is overwritten.
pub fn make_packet(command: u8, payload: &[u8]) -> Result<[u8; PACKET_LEN]> {
    ensure!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload too long: {} bytes (max {})",
        payload.len(),
        MAX_PAYLOAD_LEN
    );

    let mut packet = [0u8; PACKET_LEN];
    packet[0] = command;
    packet[1..1 + payload.len()].copy_from_slice(payload);
    packet[PACKET_LEN - 1] = checksum(&packet);
    Ok(packet)
}

pub fn make_camera_packet(action: CameraAction) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CMD_CAMERA;
    packet[1] = action as u8;
    packet[PACKET_LEN - 1] = checksum(&packet);
    packet
}

pub fn blink_twice_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CMD_BLINK_TWICE;
    packet[PACKET_LEN - 1] = checksum(&packet);
    packet
}

/// A validated packet received from the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingPacket {
    pub command: u8,
    pub payload: [u8; PACKET_LEN - 2],
}

impl RingPacket {
    /// Parse a notification, checking length and checksum
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() == PACKET_LEN, "invalid packet size: {}", bytes.len());
        ensure!(
            bytes[PACKET_LEN - 1] == checksum(bytes),
            "checksum mismatch: got {:#04x}, expected {:#04x}",
            bytes[PACKET_LEN - 1],
            checksum(bytes)
        );

        trace!("Ring packet: {:02X?}", bytes);

        let mut payload = [0u8; PACKET_LEN - 2];
        payload.copy_from_slice(&bytes[1..PACKET_LEN - 1]);
        Ok(Self {
            command: bytes[0],
            payload,
        })
    }

    pub fn camera_action(&self) -> Option<CameraAction> {
        if self.command != CMD_CAMERA {
            return None;
        }
        CameraAction::from_byte(self.payload[0])
    }
}

/// True only for an exact "take photo" camera packet
pub fn is_camera_take_photo(bytes: &[u8]) -> bool {
    match RingPacket::parse(bytes) {
        Ok(packet) => {
            packet.camera_action() == Some(CameraAction::TakePhoto)
                && packet.payload[1..].iter().all(|b| *b == 0)
        }
        Err(_) => false,
    }
}
