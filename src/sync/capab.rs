//! Ban commands and the link capabilities that gate them.
//!
//! | Command          | Capability | Wire arguments (after the command)   |
//! |------------------|------------|--------------------------------------|
//! | KLINE            | KLN        | target duration user host :reason    |
//! | UNKLINE          | UNKLN      | target user host                     |
//! | DLINE            | DLN        | target duration address :reason      |
//! | UNDLINE          | UNDLN      | target address                       |
//! | XLINE            | CLUSTER    | target gecos duration :reason        |
//! | UNXLINE          | CLUSTER    | target gecos                         |
//! | RESV             | CLUSTER    | target duration name :reason         |
//! | UNRESV           | CLUSTER    | target name                          |

use serde::Deserialize;
use std::fmt;

/// A link capability relevant to ban propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Capability {
    #[serde(rename = "KLN")]
    Kln,
    #[serde(rename = "UNKLN")]
    Unkln,
    #[serde(rename = "DLN")]
    Dln,
    #[serde(rename = "UNDLN")]
    Undln,
    #[serde(rename = "CLUSTER")]
    Cluster,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Kln => "KLN",
            Capability::Unkln => "UNKLN",
            Capability::Dln => "DLN",
            Capability::Undln => "UNDLN",
            Capability::Cluster => "CLUSTER",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Kln => 1 << 0,
            Capability::Unkln => 1 << 1,
            Capability::Dln => 1 << 2,
            Capability::Undln => 1 << 3,
            Capability::Cluster => 1 << 4,
        }
    }
}

/// Capabilities negotiated with a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<Capability>")]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(caps: Vec<Capability>) -> Self {
        caps.into_iter().collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = CapabilitySet::default();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

/// A ban command, as named in operator privileges and cluster/shared
/// blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanCommand {
    Kline,
    Unkline,
    Dline,
    Undline,
    Xline,
    Unxline,
    Resv,
    Unresv,
}

impl BanCommand {
    pub const ALL: [BanCommand; 8] = [
        BanCommand::Kline,
        BanCommand::Unkline,
        BanCommand::Dline,
        BanCommand::Undline,
        BanCommand::Xline,
        BanCommand::Unxline,
        BanCommand::Resv,
        BanCommand::Unresv,
    ];

    /// Wire and console command name.
    pub fn name(self) -> &'static str {
        match self {
            BanCommand::Kline => "KLINE",
            BanCommand::Unkline => "UNKLINE",
            BanCommand::Dline => "DLINE",
            BanCommand::Undline => "UNDLINE",
            BanCommand::Xline => "XLINE",
            BanCommand::Unxline => "UNXLINE",
            BanCommand::Resv => "RESV",
            BanCommand::Unresv => "UNRESV",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Capability a link must have to receive this command.
    pub fn capability(self) -> Capability {
        match self {
            BanCommand::Kline => Capability::Kln,
            BanCommand::Unkline => Capability::Unkln,
            BanCommand::Dline => Capability::Dln,
            BanCommand::Undline => Capability::Undln,
            BanCommand::Xline | BanCommand::Unxline | BanCommand::Resv | BanCommand::Unresv => {
                Capability::Cluster
            }
        }
    }

    /// Exact number of wire arguments, target included.
    pub fn wire_args(self) -> usize {
        match self {
            BanCommand::Kline => 5,
            BanCommand::Unkline => 3,
            BanCommand::Dline | BanCommand::Xline | BanCommand::Resv => 4,
            BanCommand::Undline | BanCommand::Unxline | BanCommand::Unresv => 2,
        }
    }

    pub fn is_removal(self) -> bool {
        matches!(
            self,
            BanCommand::Unkline | BanCommand::Undline | BanCommand::Unxline | BanCommand::Unresv
        )
    }

    fn bit(self) -> u8 {
        match self {
            BanCommand::Kline => 1 << 0,
            BanCommand::Unkline => 1 << 1,
            BanCommand::Dline => 1 << 2,
            BanCommand::Undline => 1 << 3,
            BanCommand::Xline => 1 << 4,
            BanCommand::Unxline => 1 << 5,
            BanCommand::Resv => 1 << 6,
            BanCommand::Unresv => 1 << 7,
        }
    }
}

impl fmt::Display for BanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of ban commands: operator privileges, or the types a cluster or
/// shared block covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<BanCommand>")]
pub struct CommandSet(u8);

impl CommandSet {
    pub fn all() -> Self {
        BanCommand::ALL.into_iter().collect()
    }

    pub fn contains(self, command: BanCommand) -> bool {
        self.0 & command.bit() != 0
    }

    pub fn insert(&mut self, command: BanCommand) {
        self.0 |= command.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Vec<BanCommand>> for CommandSet {
    fn from(commands: Vec<BanCommand>) -> Self {
        commands.into_iter().collect()
    }
}

impl FromIterator<BanCommand> for CommandSet {
    fn from_iter<I: IntoIterator<Item = BanCommand>>(iter: I) -> Self {
        let mut set = CommandSet::default();
        for command in iter {
            set.insert(command);
        }
        set
    }
}
