//! Ordered-section builder for `pf.conf`
//!
//! Generators append lines to named sections in any order; rendering
//! always walks [`Section::ORDER`], so section order in the output is
//! fixed here and nowhere else.

use std::collections::BTreeMap;

/// A named block of `pf.conf`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Macros,
    Tables,
    Options,
    Queues,
    IdentityQueues,
    Normalization,
    Nat,
    DefaultDeny,
    DefaultQueue,
    PassRules,
    IdentityPassRules,
    LoadBalance,
}

impl Section {
    /// Render order
    pub const ORDER: [Section; 12] = [
        Section::Macros,
        Section::Tables,
        Section::Options,
        Section::Queues,
        Section::IdentityQueues,
        Section::Normalization,
        Section::Nat,
        Section::DefaultDeny,
        Section::DefaultQueue,
        Section::PassRules,
        Section::IdentityPassRules,
        Section::LoadBalance,
    ];

    /// Comment header written above a non-empty section
    pub fn title(self) -> &'static str {
        match self {
            Section::Macros => "macros",
            Section::Tables => "tables",
            Section::Options => "options",
            Section::Queues => "queues",
            Section::IdentityQueues => "subscriber and voucher queues",
            Section::Normalization => "normalization",
            Section::Nat => "nat and redirects",
            Section::DefaultDeny => "default block",
            Section::DefaultQueue => "default queues",
            Section::PassRules => "pass rules",
            Section::IdentityPassRules => "subscriber and voucher rules",
            Section::LoadBalance => "load balancing",
        }
    }
}

/// Accumulates `pf.conf` lines per section
#[derive(Debug, Default)]
pub struct RulesetBuilder {
    sections: BTreeMap<Section, Vec<String>>,
}

impl RulesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line to a section
    pub fn push(&mut self, section: Section, line: impl Into<String>) {
        self.sections.entry(section).or_default().push(line.into());
    }

    /// Lines currently held by a section
    pub fn lines(&self, section: Section) -> &[String] {
        self.sections.get(&section).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Render all non-empty sections in [`Section::ORDER`]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in Section::ORDER {
            let lines = self.lines(section);
            if lines.is_empty() {
                continue;
            }
            out.push_str("# ");
            out.push_str(section.title());
            out.push('\n');
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}
