/// Metadata returned by `MailboxStore::select`/`examine`/`status`.
///
/// `uidvalidity` is a string, not a number: an empty string is the sentinel
/// the backend uses for "cannot produce a UIDVALIDITY right now", which the
/// dispatcher must surface to the client as a failure rather than as `0`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailboxHeader {
    pub count: u32,
    pub recent: u32,
    pub nunseen: u32,
    pub uidnext: u32,
    pub uidvalidity: String,
}

impl MailboxHeader {
    pub fn has_valid_uidvalidity(&self) -> bool {
        !self.uidvalidity.is_empty()
    }
}
