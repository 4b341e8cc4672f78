//! Policy flags and their conflict groups.
//!
//! A [`Policy`] is a set of strategy tokens; some tokens belong to a *conflict
//! group* where at most one member may be active. Each group names a *leader*
//! that is implied when no member is explicitly set, so querying a group on an
//! empty [`PolicySet`] always yields a usable answer instead of panicking.
//!
//! Groups:
//!
//! ```text
//! slice : SLICE_COPY* | SLICE_COPY_APPEND | SLICE_MERGE
//! map   : MAP_COPY*   | MAP_MERGE
//! order : BY_ORDINAL* | BY_NAME
//! ```
//!
//! (leader starred). All other flags are independent toggles.

bitflags::bitflags! {
    /// Strategy tokens governing omission, merge behavior, and naming.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Policy: u32 {
        /// Skip this field entirely.
        const IGNORE           = 1 << 0;
        /// A failure copying this field aborts the whole traversal.
        const MUST             = 1 << 1;
        /// Reset the target to zero when the source equals it.
        const CLEAR_IF_EQ      = 1 << 2;
        /// Write a zero value instead of skipping when the source is invalid.
        const CLEAR_IF_INVALID = 1 << 3;

        /// Skip when the source is empty.
        const OMIT_EMPTY       = 1 << 4;
        /// Skip when the source is nil.
        const OMIT_NIL         = 1 << 5;
        /// Skip when the source is zero-valued.
        const OMIT_ZERO        = 1 << 6;
        /// Skip when the target is empty.
        const TGT_OMIT_EMPTY   = 1 << 7;
        /// Skip when the target is nil.
        const TGT_OMIT_NIL     = 1 << 8;
        /// Skip when the target is zero-valued.
        const TGT_OMIT_ZERO    = 1 << 9;

        const SLICE_COPY        = 1 << 10;
        const SLICE_COPY_APPEND = 1 << 11;
        const SLICE_MERGE       = 1 << 12;

        const MAP_COPY  = 1 << 13;
        const MAP_MERGE = 1 << 14;

        const BY_ORDINAL = 1 << 15;
        const BY_NAME    = 1 << 16;

        /// Expand this composite field into the parent namespace.
        const FLAT    = 1 << 17;
        /// Assign handles instead of deep-copying pointees.
        const SHALLOW = 1 << 18;
    }
}

/// A mutually exclusive set of flags with a designated default leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Group {
    pub name: &'static str,
    pub members: Policy,
    pub leader: Policy,
}

pub const SLICE_GROUP: Group = Group {
    name: "slice",
    members: Policy::SLICE_COPY.union(Policy::SLICE_COPY_APPEND).union(Policy::SLICE_MERGE),
    leader: Policy::SLICE_COPY,
};

pub const MAP_GROUP: Group =
    Group { name: "map", members: Policy::MAP_COPY.union(Policy::MAP_MERGE), leader: Policy::MAP_COPY };

pub const ORDER_GROUP: Group =
    Group { name: "order", members: Policy::BY_ORDINAL.union(Policy::BY_NAME), leader: Policy::BY_ORDINAL };

const GROUPS: [&Group; 3] = [&SLICE_GROUP, &MAP_GROUP, &ORDER_GROUP];

/// The conflict group a flag belongs to, if any.
pub fn group_of(flag: Policy) -> Option<&'static Group> {
    GROUPS.iter().copied().find(|g| g.members.intersects(flag))
}

/// An explicit flag set layered over the group-leader defaults.
///
/// Setting a group member displaces any previously set member of the same
/// group (radio-group behavior). Querying a group never fails: when no member
/// is explicitly set the group leader is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicySet {
    explicit: Policy,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_flags(flags: Policy) -> Self {
        let mut set = Self::new();
        for flag in flags.iter() {
            set.set(flag);
        }
        set
    }

    /// True if no flag has been explicitly set.
    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty()
    }

    /// Explicitly set `flag`, displacing conflicting group members.
    pub fn set(&mut self, flag: Policy) {
        if let Some(group) = group_of(flag) {
            self.explicit.remove(group.members);
        }
        self.explicit.insert(flag);
    }

    pub fn with(mut self, flag: Policy) -> Self {
        self.set(flag);
        self
    }

    /// True if `flag` was explicitly set.
    pub fn has(&self, flag: Policy) -> bool {
        self.explicit.contains(flag)
    }

    /// The active member of `group`: the explicitly set one, else the leader.
    pub fn active(&self, group: &Group) -> Policy {
        let set = self.explicit & group.members;
        if set.is_empty() { group.leader } else { set }
    }

    /// True if some member of `group` was explicitly set.
    pub fn group_explicit(&self, group: &Group) -> bool {
        self.explicit.intersects(group.members)
    }

    /// Fold another set on top of this one; `other`'s flags win conflicts.
    pub fn overlay(&mut self, other: &PolicySet) {
        for flag in other.explicit.iter() {
            self.set(flag);
        }
    }

    /// Map a tag token to its flag. Unknown tokens yield `None`.
    pub fn parse_token(token: &str) -> Option<Policy> {
        Some(match token {
            "ignore" => Policy::IGNORE,
            "must" => Policy::MUST,
            "cleareq" => Policy::CLEAR_IF_EQ,
            "clearinvalid" => Policy::CLEAR_IF_INVALID,
            "omitempty" => Policy::OMIT_EMPTY,
            "omitnil" => Policy::OMIT_NIL,
            "omitzero" => Policy::OMIT_ZERO,
            "tgtomitempty" => Policy::TGT_OMIT_EMPTY,
            "tgtomitnil" => Policy::TGT_OMIT_NIL,
            "tgtomitzero" => Policy::TGT_OMIT_ZERO,
            "slicecopy" => Policy::SLICE_COPY,
            "slicecopyappend" => Policy::SLICE_COPY_APPEND,
            "slicemerge" => Policy::SLICE_MERGE,
            "mapcopy" => Policy::MAP_COPY,
            "mapmerge" => Policy::MAP_MERGE,
            "byordinal" => Policy::BY_ORDINAL,
            "byname" => Policy::BY_NAME,
            "flat" => Policy::FLAT,
            "shallow" => Policy::SHALLOW,
            _ => return None,
        })
    }
}
