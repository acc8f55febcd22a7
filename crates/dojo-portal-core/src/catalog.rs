use serde::Serialize;

/// One rank in the linear belt progression.
#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
pub struct BeltRank {
    pub ordinal: usize,
    pub name: &'static str,
    pub slug: &'static str,
    /// Lower-case keyword fragments that resolve to this rank before any
    /// name matching is attempted.
    #[serde(skip)]
    pub aliases: &'static [&'static str],
    pub focus: &'static str,
}

const BELT_SEQUENCE: [BeltRank; 14] = [
    BeltRank {
        ordinal: 0,
        name: "White Belt",
        slug: "white",
        aliases: &[],
        focus: "Foundations: attention stance, courtesy, basic blocks, and home respect goals.",
    },
    BeltRank {
        ordinal: 1,
        name: "High White Belt",
        slug: "high-white",
        aliases: &[],
        focus: "Early footwork, loud kihaps, and sharp low/high blocks with balance checks.",
    },
    BeltRank {
        ordinal: 2,
        name: "Yellow Belt",
        slug: "yellow",
        aliases: &[],
        focus: "Balance, strong front stances, and first round of one-steps.",
    },
    BeltRank {
        ordinal: 3,
        name: "High Yellow Belt",
        slug: "high-yellow",
        aliases: &[],
        focus: "Confidence linking front and side kicks with self-defense combinations.",
    },
    BeltRank {
        ordinal: 4,
        name: "Green Belt",
        slug: "green",
        aliases: &[],
        focus: "Power generation, stronger poomsae details, sparring drills.",
    },
    BeltRank {
        ordinal: 5,
        name: "High Green Belt",
        slug: "high-green",
        aliases: &[],
        focus: "Footwork triangles, counter-sparring, and advanced combination control.",
    },
    BeltRank {
        ordinal: 6,
        name: "Blue Belt",
        slug: "blue",
        aliases: &[],
        focus: "Ring control, board breaks, and intermediate sparring strategies.",
    },
    BeltRank {
        ordinal: 7,
        name: "High Blue Belt",
        slug: "high-blue",
        aliases: &[],
        focus: "Leadership reps, spin kicks, and coaching cues for junior students.",
    },
    BeltRank {
        ordinal: 8,
        name: "Red Belt",
        slug: "red",
        aliases: &[],
        focus: "Demo-ready power, teaching readiness, and board-break creativity.",
    },
    BeltRank {
        ordinal: 9,
        name: "High Red Belt",
        slug: "high-red",
        aliases: &[],
        focus: "Testing rehearsals, mentoring, and black-belt mindset assignments.",
    },
    BeltRank {
        ordinal: 10,
        name: "Black Belt",
        slug: "black",
        aliases: &[],
        focus: "Sharpen every pillar: forms, sparring, weapons, and service.",
    },
    BeltRank {
        ordinal: 11,
        name: "Black Belt 2nd Dan",
        slug: "black-2nd-dan",
        aliases: &["2nd dan", "second dan", "2nd degree"],
        focus: "Lead classes with confidence while deepening creative poomsae and sparring strategy.",
    },
    BeltRank {
        ordinal: 12,
        name: "Black Belt 3rd Dan",
        slug: "black-3rd-dan",
        aliases: &["3rd dan", "third dan", "3rd degree"],
        focus: "Coach tournament teams, design curriculum, and demonstrate advanced precision.",
    },
    BeltRank {
        ordinal: 13,
        name: "Black Belt 4th Dan",
        slug: "black-4th-dan",
        aliases: &["4th dan", "fourth dan", "4th degree"],
        focus: "Master-level leadership: instructor certification and community impact planning.",
    },
];

/// Which rule of the prioritized name match produced an ordinal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NameMatch {
    Alias,
    Exact,
    Substring,
    BlackFallback,
    Default,
}

#[derive(Debug, Clone, Copy)]
pub struct BeltCatalog {
    ranks: &'static [BeltRank],
}

impl Default for BeltCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl BeltCatalog {
    #[must_use]
    pub fn standard() -> Self {
        Self { ranks: &BELT_SEQUENCE }
    }

    #[must_use]
    pub fn ranks(&self) -> &'static [BeltRank] {
        self.ranks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    #[must_use]
    pub fn last_ordinal(&self) -> usize {
        self.ranks.len().saturating_sub(1)
    }

    #[must_use]
    pub fn get(&self, ordinal: usize) -> Option<&'static BeltRank> {
        self.ranks.get(ordinal)
    }

    /// Resolve a free-form belt name to an ordinal. Never fails: names that
    /// match nothing resolve to the lowest rank.
    #[must_use]
    pub fn resolve_index_by_name(&self, name: &str) -> usize {
        self.match_name(name).0
    }

    /// Same as [`Self::resolve_index_by_name`] but also reports which rule fired.
    ///
    /// Rules run in a fixed priority order: alias keywords, exact name,
    /// longest contained rank name, any mention of "black", then ordinal 0.
    ///
    /// The contained-name rule takes the longest rank name rather than the
    /// first one in sequence order, so "High Yellow Belt (new)" resolves to
    /// High Yellow Belt and not to Yellow Belt. Equal lengths fall back to
    /// the lower ordinal.
    #[must_use]
    pub fn match_name(&self, name: &str) -> (usize, NameMatch) {
        let normalized = name.trim().to_lowercase();
        if normalized.is_empty() {
            return (0, NameMatch::Default);
        }

        for rank in self.ranks {
            if rank.aliases.iter().any(|keyword| normalized.contains(keyword)) {
                return (rank.ordinal, NameMatch::Alias);
            }
        }

        if let Some(rank) = self.ranks.iter().find(|rank| rank.name.to_lowercase() == normalized)
        {
            return (rank.ordinal, NameMatch::Exact);
        }

        let contained = self
            .ranks
            .iter()
            .filter(|rank| normalized.contains(&rank.name.to_lowercase()))
            .max_by(|lhs, rhs| {
                lhs.name.len().cmp(&rhs.name.len()).then_with(|| rhs.ordinal.cmp(&lhs.ordinal))
            });
        if let Some(rank) = contained {
            return (rank.ordinal, NameMatch::Substring);
        }

        if normalized.contains("black") {
            return (self.last_ordinal(), NameMatch::BlackFallback);
        }

        (0, NameMatch::Default)
    }

    /// Exact slug lookup; a case-folded retry is still an exact match.
    #[must_use]
    pub fn resolve_by_slug(&self, slug: &str) -> Option<&'static BeltRank> {
        let trimmed = slug.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.ranks.iter().find(|rank| rank.slug == trimmed).or_else(|| {
            let lowered = trimmed.to_lowercase();
            self.ranks.iter().find(|rank| rank.slug == lowered)
        })
    }

    /// The rank after `ordinal`, or `None` at the top of the sequence.
    #[must_use]
    pub fn next_after(&self, ordinal: usize) -> Option<&'static BeltRank> {
        ordinal.checked_add(1).and_then(|next| self.get(next))
    }
}
