//! Messages this server dispatches, parsed from decrypted envelopes
//!
//! Parsing goes through `ByteFrame`, so a body shorter than its fields
//! unwinds with `BufferUnderrun`. Callers run `Message::parse` inside the
//! connection's fault boundary.

use protocol::{ByteFrame, Envelope};

/// Opcodes handled here; every other opcode is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Ping = 0x0011,
    Ack = 0x0012,
    Logout = 0x0013,
    SaveData = 0x0061,
    LoadData = 0x0062,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0011 => Some(Self::Ping),
            0x0012 => Some(Self::Ack),
            0x0013 => Some(Self::Logout),
            0x0061 => Some(Self::SaveData),
            0x0062 => Some(Self::LoadData),
            _ => None,
        }
    }
}

/// How a save message's payload relates to the stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveType {
    /// Payload is the whole blob, nullcomp-compressed
    Full,
    /// Payload is a deltacomp patch against the stored blob
    Diff,
}

impl SaveType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Full),
            1 => Some(Self::Diff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub ack_handle: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveData {
    pub ack_handle: u32,
    pub character_id: u32,
    pub column: u8,
    pub save_type: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadData {
    pub ack_handle: u32,
    pub character_id: u32,
    pub column: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(Ping),
    Logout,
    SaveData(SaveData),
    LoadData(LoadData),
}

impl Message {
    /// Parse a decrypted envelope. `None` for opcodes this server ignores.
    ///
    /// # Panics
    /// Unwinds with `BufferUnderrun` when the body is too short.
    pub fn parse(envelope: &Envelope) -> Option<Message> {
        let mut bf = envelope.frame();
        let message = match Opcode::from_u16(envelope.opcode)? {
            Opcode::Ping => Message::Ping(Ping {
                ack_handle: bf.read_u32(),
            }),
            Opcode::Logout => Message::Logout,
            Opcode::SaveData => {
                let ack_handle = bf.read_u32();
                let character_id = bf.read_u32();
                let column = bf.read_u8();
                let save_type = bf.read_u8();
                let size = bf.read_u32() as usize;
                Message::SaveData(SaveData {
                    ack_handle,
                    character_id,
                    column,
                    save_type,
                    payload: bf.read_bytes(size),
                })
            }
            Opcode::LoadData => Message::LoadData(LoadData {
                ack_handle: bf.read_u32(),
                character_id: bf.read_u32(),
                column: bf.read_u8(),
            }),
            // Clients never send acks to the server
            Opcode::Ack => return None,
        };
        Some(message)
    }
}

#[cfg(test)]
impl SaveData {
    pub fn to_envelope(&self) -> Envelope {
        let mut bf = ByteFrame::new();
        bf.write_u32(self.ack_handle);
        bf.write_u32(self.character_id);
        bf.write_u8(self.column);
        bf.write_u8(self.save_type);
        bf.write_u32(self.payload.len() as u32);
        bf.write_bytes(&self.payload);
        Envelope::new(Opcode::SaveData as u16, bf.into_inner())
    }
}

#[cfg(test)]
impl LoadData {
    pub fn to_envelope(&self) -> Envelope {
        let mut bf = ByteFrame::new();
        bf.write_u32(self.ack_handle);
        bf.write_u32(self.character_id);
        bf.write_u8(self.column);
        Envelope::new(Opcode::LoadData as u16, bf.into_inner())
    }
}

/// Acknowledgement sent back for any request carrying an ack handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub ack_handle: u32,
    pub success: bool,
    pub data: Vec<u8>,
}

impl Ack {
    pub fn ok(ack_handle: u32, data: Vec<u8>) -> Self {
        Self {
            ack_handle,
            success: true,
            data,
        }
    }

    pub fn failed(ack_handle: u32) -> Self {
        Self {
            ack_handle,
            success: false,
            data: Vec::new(),
        }
    }

    /// Wire layout: handle, error flag, data length, data
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bf = ByteFrame::new();
        bf.write_u32(self.ack_handle);
        bf.write_bool(!self.success);
        bf.write_u32(self.data.len() as u32);
        bf.write_bytes(&self.data);
        Envelope::new(Opcode::Ack as u16, bf.into_inner()).build()
    }

    #[cfg(test)]
    pub fn parse(envelope: &Envelope) -> Option<Ack> {
        if envelope.opcode != Opcode::Ack as u16 {
            return None;
        }
        let mut bf = envelope.frame();
        let ack_handle = bf.read_u32();
        let failed = bf.read_bool();
        let size = bf.read_u32() as usize;
        Some(Ack {
            ack_handle,
            success: !failed,
            data: bf.read_bytes(size),
        })
    }
}
