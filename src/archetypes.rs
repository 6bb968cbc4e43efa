//! Deck archetype reference set.
//!
//! Archetypes come from a JSON library file or from a directory of plain-text
//! decklists ("4 Lightning Bolt", "1x Sol Ring", "1 Sol Ring (C21) 263").

use crate::error::Result;
use crate::models::{normalize_name, DeckArchetype, DeckCard};
use std::collections::BTreeMap;
use std::path::Path;

/// Section headers found in common decklist exports
const SECTION_HEADERS: &[&str] = &[
    "deck",
    "main",
    "mainboard",
    "commander",
    "companion",
    "sideboard",
    "maybeboard",
];

/// Immutable set of deck archetypes keyed by normalized name
#[derive(Debug, Clone, Default)]
pub struct ArchetypeLibrary {
    decks: BTreeMap<String, DeckArchetype>,
}

impl ArchetypeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_archetypes<I>(archetypes: I) -> Self
    where
        I: IntoIterator<Item = DeckArchetype>,
    {
        let mut library = Self::new();
        for deck in archetypes {
            library.insert(deck);
        }
        library
    }

    /// Add an archetype, replacing one with the same name
    pub fn insert(&mut self, deck: DeckArchetype) -> Option<DeckArchetype> {
        let replaced = self.decks.insert(normalize_name(&deck.name), deck);
        if let Some(ref old) = replaced {
            log::warn!("Archetype '{}' defined twice, keeping the later one", old.name);
        }
        replaced
    }

    /// Load a JSON array of archetypes
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let decks: Vec<DeckArchetype> = serde_json::from_str(&content)?;
        log::info!(
            "Loaded {} archetypes from {}",
            decks.len(),
            path.as_ref().display()
        );
        Ok(Self::from_archetypes(decks))
    }

    /// Load every `.txt`/`.dec` decklist in a directory; the file stem names the deck
    pub fn from_decklist_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let is_decklist = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("dec"));
            if path.is_file() && is_decklist {
                paths.push(path);
            }
        }
        paths.sort();

        let mut library = Self::new();
        for path in paths {
            library.insert(read_decklist(&path)?);
        }
        log::info!(
            "Loaded {} decklists from {}",
            library.len(),
            dir.as_ref().display()
        );
        Ok(library)
    }

    /// Load from a directory of decklists, a JSON library, or a single decklist file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::from_decklist_dir(path);
        }
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_file(path)
        } else {
            Ok(Self::from_archetypes([read_decklist(path)?]))
        }
    }

    /// Case- and whitespace-insensitive lookup by name
    pub fn get(&self, name: &str) -> Option<&DeckArchetype> {
        self.decks.get(&normalize_name(name))
    }

    /// Archetypes in name order
    pub fn iter(&self) -> impl Iterator<Item = &DeckArchetype> {
        self.decks.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.decks.values().map(|deck| deck.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.decks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decks.is_empty()
    }
}

fn read_decklist(path: &Path) -> Result<DeckArchetype> {
    let text = std::fs::read_to_string(path)?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("unnamed")
        .replace('_', " ");
    Ok(parse_decklist(&name, &text))
}

/// Parse a plain-text decklist.
///
/// Blank lines, section headers and `//` or `#` comments are skipped, except
/// a `// format: <name>` comment which sets the archetype's format.
pub fn parse_decklist(name: &str, text: &str) -> DeckArchetype {
    let mut format = None;
    let mut cards = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix("//").or_else(|| line.strip_prefix('#')) {
            if let Some((key, value)) = comment.split_once(':') {
                if key.trim().eq_ignore_ascii_case("format") && !value.trim().is_empty() {
                    format = Some(value.trim().to_lowercase());
                }
            }
            continue;
        }
        if SECTION_HEADERS.contains(&line.trim_end_matches(':').to_lowercase().as_str()) {
            continue;
        }
        match parse_deck_line(line) {
            Some(card) => cards.push(card),
            None => log::debug!("{}: skipping line {}: '{}'", name, index + 1, line),
        }
    }

    DeckArchetype {
        name: name.to_string(),
        format,
        cards,
    }
}

fn parse_deck_line(line: &str) -> Option<DeckCard> {
    let (count, rest) = line.split_once(char::is_whitespace)?;
    let quantity: u32 = count.trim_end_matches(['x', 'X']).parse().ok()?;
    if quantity == 0 {
        return None;
    }

    // drop foil/etched markers from Moxfield exports
    let rest = rest
        .trim()
        .trim_end_matches("*F*")
        .trim_end_matches("*E*")
        .trim();
    if rest.is_empty() {
        return None;
    }

    if let Some(open) = rest.rfind(" (") {
        let (name, printing) = rest.split_at(open);
        let printing = printing.trim();
        if let Some((set, number)) = printing.strip_prefix('(').and_then(|p| p.split_once(')')) {
            let (set, number) = (set.trim(), number.trim());
            if !set.is_empty() && !number.is_empty() && !number.contains(char::is_whitespace) {
                return Some(DeckCard {
                    name: name.trim().to_string(),
                    set_code: Some(set.to_string()),
                    collector_number: Some(number.to_string()),
                    quantity,
                });
            }
        }
    }

    Some(DeckCard::named(rest, quantity))
}
