/// The crc32 checksum of some data, used to tie log lines about the
/// same file together.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::default();
    hasher.update(data);
    hasher.finalize()
}
