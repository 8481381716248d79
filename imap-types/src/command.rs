use crate::flag::Flag;
use crate::sequence::SequenceSet;

/// A parsed client command: its tag plus the state-gated body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub tag: String,
    pub body: CommandBody,
}

/// Which session states a `CommandBody` is legal in. See
/// `CommandBody::group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    AnyState,
    NotAuthenticated,
    Authenticated,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Add,
    Remove,
    Replace,
}

/// A single `FETCH` data item. `Body`'s `section` is the raw bracketed text
/// (e.g. `"TEXT"`, `"1.2.HEADER"`, or `""` for the whole message); formatting
/// the actual octets is the storage backend's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchAttr {
    Flags,
    Uid,
    InternalDate,
    Rfc822Size,
    Rfc822,
    Rfc822Header,
    Rfc822Text,
    Envelope,
    BodyStructure,
    Body { section: String, peek: bool },
}

/// A single SEARCH key atom (the leaves of `SearchKey`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAtom {
    All,
    Answered,
    Deleted,
    Flagged,
    New,
    Old,
    Recent,
    Seen,
    Unanswered,
    Undeleted,
    Unflagged,
    Unseen,
    Draft,
    Undraft,
    Uid(SequenceSet),
    SequenceSet(SequenceSet),
    Header(String, String),
    Subject(String),
    From(String),
    To(String),
    Cc(String),
    Bcc(String),
    Body(String),
    Text(String),
    Keyword(String),
    Unkeyword(String),
    Since(String),
    Before(String),
    On(String),
    SentSince(String),
    SentBefore(String),
    SentOn(String),
    Larger(u32),
    Smaller(u32),
}

/// The recursive SEARCH expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    Key(SearchAtom),
    KeyList(Vec<SearchKey>),
    Not(Box<SearchKey>),
    Or(Box<SearchKey>, Box<SearchKey>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    // --- AnyState ---
    Id(Option<Vec<(String, Option<String>)>>),
    Capability,
    Noop,
    Logout,

    // --- NotAuthenticated ---
    Authenticate {
        mechanism: String,
        initial_response: Option<Vec<u8>>,
    },
    Login {
        username: String,
        password: String,
    },
    StartTls,
    /// Privileged local-injection variant of APPEND. See §6 "LAPPEND".
    LAppend {
        user: String,
        mailbox: String,
        flags: Vec<Flag>,
        date: Option<String>,
        literal_len: u32,
        non_synchronizing: bool,
    },

    // --- Authenticated (also legal in Selected) ---
    Select(String),
    Examine(String),
    Create(String),
    Delete(String),
    Rename {
        from: String,
        to: String,
    },
    Subscribe(String),
    Unsubscribe(String),
    List {
        reference: String,
        pattern: String,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
        items: Vec<StatusItem>,
    },
    Append {
        mailbox: String,
        flags: Vec<Flag>,
        date: Option<String>,
        literal_len: u32,
        non_synchronizing: bool,
    },
    Idle,
    Done,

    // --- Selected only ---
    Check,
    Close,
    Expunge,
    Search {
        charset: Option<String>,
        tree: SearchKey,
        by_uid: bool,
    },
    Fetch {
        sequence_set: SequenceSet,
        attributes: Vec<FetchAttr>,
        by_uid: bool,
    },
    Store {
        sequence_set: SequenceSet,
        op: StoreOp,
        silent: bool,
        flags: Vec<Flag>,
        by_uid: bool,
    },
    Copy {
        sequence_set: SequenceSet,
        mailbox: String,
        by_uid: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    Uidnext,
    Uidvalidity,
    Unseen,
}

impl CommandBody {
    /// Which states accept this command. Used by the dispatcher's
    /// precondition check; see SPEC_FULL.md §4.3.
    pub fn group(&self) -> CommandGroup {
        use CommandBody::*;
        match self {
            Id(_) | Capability | Noop | Logout => CommandGroup::AnyState,

            Authenticate { .. } | Login { .. } | StartTls | LAppend { .. } => {
                CommandGroup::NotAuthenticated
            }

            Select(_)
            | Examine(_)
            | Create(_)
            | Delete(_)
            | Rename { .. }
            | Subscribe(_)
            | Unsubscribe(_)
            | List { .. }
            | Lsub { .. }
            | Status { .. }
            | Append { .. }
            | Idle
            | Done => CommandGroup::Authenticated,

            Check | Close | Expunge | Search { .. } | Fetch { .. } | Store { .. } | Copy { .. } => {
                CommandGroup::Selected
            }
        }
    }

    pub fn name(&self) -> &'static str {
        use CommandBody::*;
        match self {
            Id(_) => "ID",
            Capability => "CAPABILITY",
            Noop => "NOOP",
            Logout => "LOGOUT",
            Authenticate { .. } => "AUTHENTICATE",
            Login { .. } => "LOGIN",
            StartTls => "STARTTLS",
            LAppend { .. } => "LAPPEND",
            Select(_) => "SELECT",
            Examine(_) => "EXAMINE",
            Create(_) => "CREATE",
            Delete(_) => "DELETE",
            Rename { .. } => "RENAME",
            Subscribe(_) => "SUBSCRIBE",
            Unsubscribe(_) => "UNSUBSCRIBE",
            List { .. } => "LIST",
            Lsub { .. } => "LSUB",
            Status { .. } => "STATUS",
            Append { .. } => "APPEND",
            Idle => "IDLE",
            Done => "DONE",
            Check => "CHECK",
            Close => "CLOSE",
            Expunge => "EXPUNGE",
            Search { .. } => "SEARCH",
            Fetch { .. } => "FETCH",
            Store { .. } => "STORE",
            Copy { .. } => "COPY",
        }
    }
}
