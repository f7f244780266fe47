use uuid::Uuid;

/// `SQLGUID`: the first three groups are native-endian integers, the last
/// eight bytes are stored as-is.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SqlGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl From<&Uuid> for SqlGuid {
    fn from(value: &Uuid) -> Self {
        let (data1, data2, data3, data4) = value.as_fields();
        SqlGuid {
            data1,
            data2,
            data3,
            data4: *data4,
        }
    }
}

impl From<&SqlGuid> for Uuid {
    fn from(value: &SqlGuid) -> Self {
        Uuid::from_fields(value.data1, value.data2, value.data3, &value.data4)
    }
}

impl SqlGuid {
    /// `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, upper-case hex.
    pub fn to_hyphenated(&self) -> String {
        format!(
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_follow_uuid_groups() {
        let id = Uuid::parse_str("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        let guid = SqlGuid::from(&id);
        assert_eq!(guid.data1, 0x6f9619ff);
        assert_eq!(guid.data2, 0x8b86);
        assert_eq!(guid.data3, 0xd011);
        assert_eq!(guid.data4, [0xb4, 0x2d, 0x00, 0xc0, 0x4f, 0xc9, 0x64, 0xff]);
        assert_eq!(Uuid::from(&guid), id);
    }

    #[test]
    fn test_hyphenated_text() {
        let guid = SqlGuid {
            data1: 0x0102_0304,
            data2: 0x0506,
            data3: 0x0708,
            data4: [0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, 0x10],
        };
        assert_eq!(guid.to_hyphenated(), "01020304-0506-0708-090A-0B0C0D0E0F10");
    }
}
