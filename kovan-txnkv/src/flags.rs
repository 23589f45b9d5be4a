use std::fmt;

/// Per-key metadata bits, independent of the key's value.
///
/// A staged write copies the key's current flags into the new layer before
/// applying its own [`FlagsOp`]s, so the topmost entry always carries the
/// complete, authoritative set.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KeyFlags(u16);

impl KeyFlags {
    pub const EMPTY: KeyFlags = KeyFlags(0);
    /// The key is known not to exist remotely; a buffer miss is a definite miss.
    pub const PRESUME_KEY_NOT_EXISTS: KeyFlags = KeyFlags(1 << 0);
    /// A pessimistic lock on the key is held by this transaction.
    pub const KEY_LOCKED: KeyFlags = KeyFlags(1 << 1);
    /// The key existed when its pessimistic lock was taken.
    pub const KEY_LOCKED_VAL_EXIST: KeyFlags = KeyFlags(1 << 2);
    /// The key must be locked before commit.
    pub const NEED_LOCKED: KeyFlags = KeyFlags(1 << 3);
    /// The staged value is identical to the committed one; skipped at commit.
    pub const UNTOUCHED: KeyFlags = KeyFlags(1 << 4);
    /// The key participates in locking but carries no value change.
    pub const LOCK_ONLY: KeyFlags = KeyFlags(1 << 5);
    pub const PREWRITE_ONLY: KeyFlags = KeyFlags(1 << 6);
    pub const IGNORED_IN_2PC: KeyFlags = KeyFlags(1 << 7);

    /// Bits describing remote state that outlives the staging layer that recorded them.
    pub const PERSISTENT: KeyFlags =
        KeyFlags(Self::KEY_LOCKED.0 | Self::KEY_LOCKED_VAL_EXIST.0);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: KeyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 | other.0)
    }

    pub const fn intersection(self, other: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 & other.0)
    }

    pub const fn difference(self, other: KeyFlags) -> KeyFlags {
        KeyFlags(self.0 & !other.0)
    }

    pub fn has_presume_key_not_exists(self) -> bool {
        self.contains(Self::PRESUME_KEY_NOT_EXISTS)
    }

    pub fn has_locked(self) -> bool {
        self.contains(Self::KEY_LOCKED)
    }

    pub fn has_locked_value_exists(self) -> bool {
        self.contains(Self::KEY_LOCKED_VAL_EXIST)
    }

    pub fn has_need_locked(self) -> bool {
        self.contains(Self::NEED_LOCKED)
    }

    pub fn has_untouched(self) -> bool {
        self.contains(Self::UNTOUCHED)
    }

    pub fn has_lock_only(self) -> bool {
        self.contains(Self::LOCK_ONLY)
    }

    pub fn has_ignored_in_2pc(self) -> bool {
        self.contains(Self::IGNORED_IN_2PC)
    }

    /// Whether the commit path must leave this key out of the mutation set.
    pub fn skipped_at_commit(self) -> bool {
        self.has_untouched() || self.has_ignored_in_2pc()
    }

    pub fn persistent(self) -> KeyFlags {
        self.intersection(Self::PERSISTENT)
    }

    /// Applies `ops` in order.
    pub fn apply(self, ops: &[FlagsOp]) -> KeyFlags {
        ops.iter().fold(self, |acc, op| op.apply(acc))
    }
}

impl std::ops::BitOr for KeyFlags {
    type Output = KeyFlags;

    fn bitor(self, rhs: KeyFlags) -> KeyFlags {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for KeyFlags {
    fn bitor_assign(&mut self, rhs: KeyFlags) {
        *self = self.union(rhs);
    }
}

const FLAG_NAMES: &[(KeyFlags, &str)] = &[
    (KeyFlags::PRESUME_KEY_NOT_EXISTS, "PresumeKNE"),
    (KeyFlags::KEY_LOCKED, "KeyLocked"),
    (KeyFlags::KEY_LOCKED_VAL_EXIST, "KeyLockedValExist"),
    (KeyFlags::NEED_LOCKED, "NeedLocked"),
    (KeyFlags::UNTOUCHED, "Untouched"),
    (KeyFlags::LOCK_ONLY, "LockOnly"),
    (KeyFlags::PREWRITE_ONLY, "PrewriteOnly"),
    (KeyFlags::IGNORED_IN_2PC, "IgnoredIn2PC"),
];

impl fmt::Debug for KeyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        for (flag, name) in FLAG_NAMES {
            if self.contains(*flag) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

/// A single mutation of a key's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagsOp {
    SetPresumeKeyNotExists,
    DelPresumeKeyNotExists,
    SetKeyLocked,
    DelKeyLocked,
    SetKeyLockedValueExists,
    SetKeyLockedValueNotExists,
    SetNeedLocked,
    DelNeedLocked,
    SetUntouched,
    SetLockOnly,
    DelLockOnly,
    SetPrewriteOnly,
    SetIgnoredIn2PC,
}

impl FlagsOp {
    pub fn apply(self, flags: KeyFlags) -> KeyFlags {
        match self {
            FlagsOp::SetPresumeKeyNotExists => flags | KeyFlags::PRESUME_KEY_NOT_EXISTS,
            FlagsOp::DelPresumeKeyNotExists => {
                flags.difference(KeyFlags::PRESUME_KEY_NOT_EXISTS)
            }
            FlagsOp::SetKeyLocked => flags | KeyFlags::KEY_LOCKED,
            FlagsOp::DelKeyLocked => flags.difference(KeyFlags::KEY_LOCKED),
            FlagsOp::SetKeyLockedValueExists => flags | KeyFlags::KEY_LOCKED_VAL_EXIST,
            FlagsOp::SetKeyLockedValueNotExists => {
                flags.difference(KeyFlags::KEY_LOCKED_VAL_EXIST)
            }
            FlagsOp::SetNeedLocked => flags | KeyFlags::NEED_LOCKED,
            FlagsOp::DelNeedLocked => flags.difference(KeyFlags::NEED_LOCKED),
            FlagsOp::SetUntouched => flags | KeyFlags::UNTOUCHED,
            FlagsOp::SetLockOnly => flags | KeyFlags::LOCK_ONLY,
            FlagsOp::DelLockOnly => flags.difference(KeyFlags::LOCK_ONLY),
            FlagsOp::SetPrewriteOnly => flags | KeyFlags::PREWRITE_ONLY,
            FlagsOp::SetIgnoredIn2PC => flags | KeyFlags::IGNORED_IN_2PC,
        }
    }
}
