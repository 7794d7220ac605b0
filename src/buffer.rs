use core::mem::MaybeUninit;

/// Outbound byte stream for one transaction, bounded at the SMBus block cap.
///
/// Bytes are loaded once (response or controller payload) and then drained
/// one per TX-empty event through the `Iterator` impl.
pub struct SendBuffer<const CAP: usize> {
    buf: MaybeUninit<[u8; CAP]>,
    pos: usize,
    end: usize,
}

impl<const CAP: usize> SendBuffer<CAP> {
    pub const fn new() -> Self {
        Self {
            buf: MaybeUninit::uninit(),
            pos: 0,
            end: 0,
        }
    }

    /// Stages `data` for transmission. The previous transaction must have
    /// been drained or reset.
    pub fn load(&mut self, data: &[u8]) -> Result<(), usize> {
        if data.len() > CAP {
            return Err(data.len());
        }

        unsafe { self.buf.assume_init_mut()[..data.len()].copy_from_slice(data) };
        self.pos = 0;
        self.end = data.len();
        Ok(())
    }

    /// Appends a single byte, used to prefix block responses with their
    /// count byte.
    pub fn push(&mut self, byte: u8) -> Result<(), usize> {
        if self.end == CAP {
            return Err(self.end);
        }

        unsafe { self.buf.assume_init_mut()[self.end] = byte };
        self.end += 1;
        Ok(())
    }

    /// Appends `data` after whatever is already staged.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), usize> {
        if self.end + data.len() > CAP {
            return Err(self.end + data.len());
        }

        unsafe { self.buf.assume_init_mut()[self.end..self.end + data.len()].copy_from_slice(data) };
        self.end += data.len();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.end = 0;
    }

    /// Bytes handed to the hardware so far.
    pub fn sent(&self) -> usize {
        self.pos
    }

    /// Bytes staged in total.
    pub fn loaded(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.pos
    }
}

impl<const CAP: usize> Iterator for SendBuffer<CAP> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            None
        } else {
            self.pos += 1;
            Some(unsafe { self.buf.assume_init_ref()[self.pos - 1] })
        }
    }
}

/// Inbound byte accumulator for one transaction.
pub struct ReceiveBuffer<const CAP: usize> {
    buf: MaybeUninit<[u8; CAP]>,
    len: usize,
}

impl<const CAP: usize> ReceiveBuffer<CAP> {
    pub const fn new() -> Self {
        Self {
            buf: MaybeUninit::uninit(),
            len: 0,
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<(), ()> {
        if self.len == CAP {
            Err(())
        } else {
            unsafe { self.buf.assume_init_mut()[self.len] = byte };
            self.len += 1;
            Ok(())
        }
    }

    /// Unfilled tail the hardware FIFO may be drained into, capped at
    /// `limit` bytes. `commit` must follow with the count actually read.
    pub fn writable(&mut self, limit: usize) -> &mut [u8] {
        let end = CAP.min(self.len + limit);
        unsafe { &mut self.buf.assume_init_mut()[self.len..end] }
    }

    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.len + n <= CAP);
        self.len = CAP.min(self.len + n);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { &self.buf.assume_init_ref()[..self.len] }
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_buffer_drains_in_order() {
        let mut sb: SendBuffer<8> = SendBuffer::new();
        sb.load(&[1, 2, 3]).unwrap();
        assert_eq!(sb.loaded(), 3);
        assert_eq!(sb.next(), Some(1));
        assert_eq!(sb.sent(), 1);
        assert_eq!(sb.next(), Some(2));
        assert_eq!(sb.next(), Some(3));
        assert_eq!(sb.next(), None);
        assert!(sb.is_empty());
    }

    #[test]
    fn send_buffer_rejects_oversize_load() {
        let mut sb: SendBuffer<4> = SendBuffer::new();
        assert_eq!(sb.load(&[0; 5]), Err(5));
        assert!(sb.is_empty());
    }

    #[test]
    fn push_prefixes_before_load_position() {
        let mut sb: SendBuffer<4> = SendBuffer::new();
        sb.push(3).unwrap();
        sb.push(7).unwrap();
        assert_eq!(sb.next(), Some(3));
        assert_eq!(sb.next(), Some(7));
    }

    #[test]
    fn receive_buffer_bounds_and_window() {
        let mut rb: ReceiveBuffer<4> = ReceiveBuffer::new();
        rb.push(0xaa).unwrap();
        assert_eq!(rb.writable(10).len(), 3);
        let w = rb.writable(2);
        w[0] = 0xbb;
        w[1] = 0xcc;
        rb.commit(2);
        assert_eq!(rb.as_slice(), &[0xaa, 0xbb, 0xcc]);
        rb.push(0xdd).unwrap();
        assert_eq!(rb.push(0xee), Err(()));
        assert!(rb.writable(8).is_empty());
        rb.reset();
        assert!(rb.is_empty());
    }
}
