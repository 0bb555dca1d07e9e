//! ISAM error codes, their descriptions, and per-engine diagnostic state.
//!
//! Codes start at [`ERROR_BASE`] and run up to (but not including)
//! [`ERROR_LIMIT`]. Gaps in the numbering describe as "Unknown error".

/// Lowest ISAM error code.
pub const ERROR_BASE: i32 = 100;

pub const EDUPL: i32 = 100;
pub const ENOTOPEN: i32 = 101;
pub const EBADARG: i32 = 102;
pub const EBADKEY: i32 = 103;
pub const ETOOMANY: i32 = 104;
pub const EBADFILE: i32 = 105;
pub const ENOTEXCL: i32 = 106;
pub const ELOCKED: i32 = 107;
pub const EKEXISTS: i32 = 108;
pub const EPRIMKEY: i32 = 109;
pub const EENDFILE: i32 = 110;
pub const ENOREC: i32 = 111;
pub const ENOCURR: i32 = 112;
pub const EFLOCKED: i32 = 113;
pub const EFNAME: i32 = 114;
pub const ENOLOK: i32 = 115;
pub const EBADMEM: i32 = 116;
pub const EBADCOLL: i32 = 117;
pub const ELOGREAD: i32 = 118;
pub const EBADLOG: i32 = 119;
pub const ELOGOPEN: i32 = 120;
pub const ELOGWRIT: i32 = 121;
pub const ENOTRANS: i32 = 122;
pub const ENOSHMEM: i32 = 123;
pub const ENOBEGIN: i32 = 124;
pub const ENONFS: i32 = 125;
pub const EBADROWID: i32 = 126;
pub const ENOPRIM: i32 = 127;
pub const ENOLOG: i32 = 128;
pub const EUSER: i32 = 129;
pub const ENODBS: i32 = 130;
pub const ENOFREE: i32 = 131;
pub const EROWSIZE: i32 = 132;
pub const EAUDIT: i32 = 133;
pub const ENOLOCKS: i32 = 134;
pub const ENOPARTN: i32 = 135;
pub const ENOEXTN: i32 = 136;
pub const EOVCHUNK: i32 = 137;
pub const EOVDBS: i32 = 138;
pub const EOVLOG: i32 = 139;
pub const EGBLSECT: i32 = 140;
pub const EOVPARTN: i32 = 141;
pub const EOVPPAGE: i32 = 142;
pub const EDEADLOK: i32 = 143;
pub const EKLOCKED: i32 = 144;
pub const EDEADDEM: i32 = 149;
pub const ENOMANU: i32 = 153;
pub const EINTERUPT: i32 = 157;
pub const EBADFORMAT: i32 = 171;

/// One past the highest ISAM error code.
pub const ERROR_LIMIT: i32 = 172;

const UNKNOWN: &str = "Unknown error";

/// Descriptions indexed by `code - ERROR_BASE`.
static ERROR_LIST: [&str; (ERROR_LIMIT - ERROR_BASE) as usize] = [
    "EDUPL: Duplicate row",
    "ENOTOPEN: File not open",
    "EBADARG: Illegal argument",
    "EBADKEY: Illegal key desc",
    "ETOOMANY: Too many files open",
    "EBADFILE: Bad isam file format",
    "ENOTEXCL: Non-exclusive access",
    "ELOCKED: Row locked",
    "EKEXISTS: Key already exists",
    "EPRIMKEY: Is primary key",
    "EENDFILE: End/begin of file",
    "ENOREC: No row found",
    "ENOCURR: No current row",
    "EFLOCKED: File locked",
    "EFNAME: File name too long",
    "ENOLOK: Can't create lock file",
    "EBADMEM: Can't alloc memory",
    "EBADCOLL: Bad custom collating",
    "ELOGREAD: Cannot read log rec",
    "EBADLOG: Bad log row",
    "ELOGOPEN: Cannot open log file",
    "ELOGWRIT: Cannot write log rec",
    "ENOTRANS: No transaction",
    "ENOSHMEM: No shared memory",
    "ENOBEGIN: No begin work yet",
    "ENONFS: Can't use nfs",
    "EBADROWID: Bad rowid",
    "ENOPRIM: No primary key",
    "ENOLOG: No logging",
    "EUSER: Too many users",
    "ENODBS: No such dbspace",
    "ENOFREE: No free disk space",
    "EROWSIZE: Row size too short / long",
    "EAUDIT: Audit trail exists",
    "ENOLOCKS: No more locks",
    "ENOPARTN: Partition doesn't exist",
    "ENOEXTN: No more extents",
    "EOVCHUNK: Chunk table overflow",
    "EOVDBS: Dbspace table ovflow",
    "EOVLOG: Logfile table ovflow",
    "EGBLSECT: Global section disallowing access - VMS",
    "EOVPARTN: Partition table ovfo",
    "EOVPPAGE: Overflow partn page",
    "EDEADLOK: Deadlock avoidance",
    "EKLOCKED: Key value locked",
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    "EDEADDEM: Turbo demon has died",
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    "ENOMANU: Must be in ISMANULOCK mode",
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    "EINTERUPT: Interrupted isam call",
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    "EBADFORMAT: Locking or NODESIZE change",
];

/// Human-readable description of an ISAM error code.
///
/// Returns "Unknown error" for codes outside the table or in its gaps.
#[must_use]
pub fn describe(code: i32) -> &'static str {
    code.checked_sub(ERROR_BASE)
        .and_then(|offset| usize::try_from(offset).ok())
        .and_then(|offset| ERROR_LIST.get(offset))
        .copied()
        .unwrap_or(UNKNOWN)
}

/// The pool operation most recently entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    LockAcquire = 0x01,
    LockRelease = 0x02,
    TreeAcquire = 0x10,
    TreeReleaseAll = 0x11,
    KeyAcquire = 0x20,
    KeyFreeAll = 0x21,
    KeyFreeOne = 0x22,
    KeyDrain = 0x23,
    KeyLink = 0x24,
    ChildAttach = 0x25,
    CursorSet = 0x26,
    FileOpen = 0x30,
    FileClose = 0x31,
}

impl Operation {
    /// Numeric code stored as the last-called operation.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Last-error bookkeeping kept for the surrounding engine's error reporting.
///
/// None of this feeds back into pool correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Code of the last failure, or 0 if the last call succeeded.
    pub last_error: i32,
    /// The last operation entered.
    pub last_call: Option<Operation>,
    /// Row length of the current variable-length row.
    pub record_length: usize,
    /// Current row number.
    pub record_number: u64,
}

impl Diagnostics {
    /// Record entry into `operation` and clear the previous error.
    pub const fn begin(&mut self, operation: Operation) {
        self.last_call = Some(operation);
        self.last_error = 0;
    }

    /// Record a failure code.
    pub const fn fail(&mut self, code: i32) {
        self.last_error = code;
    }

    /// Description of the last failure, if any.
    #[must_use]
    pub fn last_error_text(&self) -> Option<&'static str> {
        (self.last_error != 0).then(|| describe(self.last_error))
    }
}
