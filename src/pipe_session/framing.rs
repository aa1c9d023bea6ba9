/// Headroom kept free before every read; the buffer grows by this much when short.
pub const MIN_HEADROOM: usize = 40 * 1024;

/// Growable byte store that splits a raw stream into newline-terminated lines.
///
/// Bytes are read straight into [`LineBuffer::spare_mut`] and committed with
/// [`LineBuffer::commit`]. Complete lines keep their trailing `\n`; an
/// unterminated fragment stays in the buffer until more bytes arrive.
#[derive(Debug, Default)]
pub struct LineBuffer {
    storage: Vec<u8>,
    used: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writable tail of the buffer, grown first if less than [`MIN_HEADROOM`] is left.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.storage.len() - self.used < MIN_HEADROOM {
            let grown = self.storage.len() + MIN_HEADROOM;
            self.storage.resize(grown, 0);
        }
        &mut self.storage[self.used..]
    }

    /// Mark `count` bytes of the spare region as filled.
    ///
    /// Returns true when the newly committed bytes contain at least one newline.
    pub fn commit(&mut self, count: usize) -> bool {
        let end = (self.used + count).min(self.storage.len());
        let fresh = &self.storage[self.used..end];
        let has_newline = fresh.contains(&b'\n');
        self.used = end;
        has_newline
    }

    /// Copy `bytes` into the buffer, as a read of the same bytes would.
    pub fn extend_from_slice(&mut self, mut bytes: &[u8]) -> bool {
        let mut has_newline = false;
        while !bytes.is_empty() {
            let spare = self.spare_mut();
            let take = spare.len().min(bytes.len());
            spare[..take].copy_from_slice(&bytes[..take]);
            has_newline |= self.commit(take);
            bytes = &bytes[take..];
        }
        has_newline
    }

    /// Hand every complete line to `emit` in stream order, keeping the tail fragment.
    pub fn drain_lines<F: FnMut(String)>(&mut self, mut emit: F) -> usize {
        let mut start = 0;
        let mut emitted = 0;
        while let Some(offset) = self.storage[start..self.used]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let end = start + offset + 1;
            emit(String::from_utf8_lossy(&self.storage[start..end]).into_owned());
            emitted += 1;
            start = end;
        }
        if start > 0 {
            self.storage.copy_within(start..self.used, 0);
            self.used -= start;
        }
        emitted
    }

    /// Bytes received after the last newline.
    pub fn pending(&self) -> &[u8] {
        &self.storage[..self.used]
    }

    /// Allocated size, including headroom.
    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.storage.len()
    }
}
