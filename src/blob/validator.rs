//! Policy checks applied to every pending write before it touches disk.

use crate::transaction::RowId;

/// Application-level policy for blob payloads.
///
/// Returning `Err(reason)` aborts the whole prepare phase of the
/// transaction.
pub trait BlobValidator: Send + Sync {
    /// `payload` is `None` when the blob is being cleared.
    fn validate(&self, row: RowId, name: &str, payload: Option<&[u8]>) -> Result<(), String>;
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl BlobValidator for AcceptAll {
    fn validate(&self, _row: RowId, _name: &str, _payload: Option<&[u8]>) -> Result<(), String> {
        Ok(())
    }
}

/// Rejects payloads larger than a fixed number of bytes.
#[derive(Debug, Clone, Copy)]
pub struct MaxSize(pub usize);

impl BlobValidator for MaxSize {
    fn validate(&self, _row: RowId, _name: &str, payload: Option<&[u8]>) -> Result<(), String> {
        match payload {
            Some(bytes) if bytes.len() > self.0 => Err(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.0
            )),
            _ => Ok(()),
        }
    }
}

impl<F> BlobValidator for F
where
    F: Fn(RowId, &str, Option<&[u8]>) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, row: RowId, name: &str, payload: Option<&[u8]>) -> Result<(), String> {
        self(row, name, payload)
    }
}
