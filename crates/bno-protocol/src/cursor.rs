use crate::DecodeError;

/// Consumes fields from the front of a payload.
pub struct ByteCursor<'a> {
    rest: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }

    pub fn remaining(&self) -> usize {
        self.rest.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.rest.len() {
            return Err(DecodeError::Truncated {
                needed: n,
                remaining: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn i8(&mut self) -> Result<i8, DecodeError> {
        Ok(i8::from_le_bytes(self.array()?))
    }

    pub fn u16_be(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn i16_le(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_consumption() {
        let mut c = ByteCursor::new(&[0x01, 0x02, 0x03, 0x18, 0xFC, 0xFF]);
        assert_eq!(c.u8().unwrap(), 0x01);
        assert_eq!(c.u16_be().unwrap(), 0x0203);
        assert_eq!(c.i16_le().unwrap(), -1000);
        assert_eq!(c.i8().unwrap(), -1);
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn test_truncation_leaves_cursor_in_place() {
        let mut c = ByteCursor::new(&[0x01]);
        assert_eq!(
            c.i16_le(),
            Err(DecodeError::Truncated {
                needed: 2,
                remaining: 1
            })
        );
        assert_eq!(c.u8().unwrap(), 0x01);
    }
}
