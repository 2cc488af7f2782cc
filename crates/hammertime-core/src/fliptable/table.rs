use log::{debug, info};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Add;
use std::path::Path;
use std::str::FromStr;

use crate::fliptable::{Attack, Diff, PhysAttack};
use crate::memory::MemoryLayout;
use crate::{Error, Result};

/// Hammering parameters recorded in a fliptable header line, e.g.
/// `# { h_cfg: assisted_double_sided, d_cfg: random, h_rows: 2, h_rounds: 1000000, base: r00100.bk02}`.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// `key: value` pairs in header order
    pub entries: Vec<(String, String)>,
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_value_char(c: char) -> bool {
    is_key_char(c) || c == '.'
}

impl Parameters {
    /// Parses all `key: value` pairs of a header line. Returns `None` if there are none.
    ///
    /// Keys are runs of word characters and `-`, values may also contain `.`. Whitespace
    /// around the colon is allowed; any other punctuation (braces, commas) separates pairs.
    pub fn parse(line: &str) -> Option<Parameters> {
        let chars: Vec<char> = line.chars().collect();
        let mut entries = Vec::new();
        // a key may not reach back into the previous value
        let mut consumed = 0;
        let mut i = 0;
        while i < chars.len() {
            if chars[i] != ':' {
                i += 1;
                continue;
            }
            let mut key_end = i;
            while key_end > consumed && chars[key_end - 1].is_whitespace() {
                key_end -= 1;
            }
            let mut key_start = key_end;
            while key_start > consumed && is_key_char(chars[key_start - 1]) {
                key_start -= 1;
            }
            let mut val_start = i + 1;
            while val_start < chars.len() && chars[val_start].is_whitespace() {
                val_start += 1;
            }
            let mut val_end = val_start;
            while val_end < chars.len() && is_value_char(chars[val_end]) {
                val_end += 1;
            }
            if key_start == key_end || val_start == val_end {
                i += 1;
                continue;
            }
            entries.push((
                chars[key_start..key_end].iter().collect(),
                chars[val_start..val_end].iter().collect(),
            ));
            consumed = val_end;
            i = val_end;
        }
        if entries.is_empty() {
            None
        } else {
            Some(Parameters { entries })
        }
    }

    /// Looks up the value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Groups consecutive report lines into attacks.
///
/// Each line decodes to one attack; consecutive lines with the same targets are merged.
/// Blank lines and `#` comments are skipped. Created by [`decode_lines`].
pub struct DecodeLines<I> {
    lines: I,
    lineno: usize,
    current: Option<Attack>,
}

/// Lazily decodes report lines into attacks, see [`DecodeLines`].
///
/// A malformed line yields an [`Error::Parse`] carrying its 1-based line number.
pub fn decode_lines<I, S>(lines: I) -> DecodeLines<I::IntoIter>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    DecodeLines {
        lines: lines.into_iter(),
        lineno: 0,
        current: None,
    }
}

impl<I, S> Iterator for DecodeLines<I>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    type Item = Result<Attack>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(line) = self.lines.next() else {
                return self.current.take().map(Ok);
            };
            self.lineno += 1;
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let attack = match Attack::decode_line(line) {
                Ok(attack) => attack,
                Err(e) => return Some(Err(e.at_line(self.lineno))),
            };
            match self.current.take() {
                None => self.current = Some(attack),
                Some(current) if current.same_targets(&attack) => {
                    self.current = Some(current.absorb(attack))
                }
                Some(current) => {
                    self.current = Some(attack);
                    return Some(Ok(current));
                }
            }
        }
    }
}

/// An ordered collection of attacks, usually the report of one profiling run.
///
/// Iteration and serialization keep insertion order. [`Fliptable::diff`] additionally
/// requires both tables to be sorted by target sequence.
#[derive(Serialize, Debug, Clone, Default)]
pub struct Fliptable {
    attacks: Vec<Attack>,
    params: Option<Parameters>,
}

impl PartialEq for Fliptable {
    fn eq(&self, other: &Self) -> bool {
        self.attacks == other.attacks
    }
}

impl Eq for Fliptable {}

impl Fliptable {
    /// Creates a fliptable from attacks.
    pub fn new(attacks: Vec<Attack>) -> Self {
        Fliptable {
            attacks,
            params: None,
        }
    }

    /// Returns the attacks in table order.
    pub fn attacks(&self) -> &[Attack] {
        &self.attacks
    }

    /// Returns the hammering parameters from the report header, if any.
    pub fn params(&self) -> Option<&Parameters> {
        self.params.as_ref()
    }

    /// Returns the number of attacks.
    pub fn len(&self) -> usize {
        self.attacks.len()
    }

    /// Returns true if the table has no attacks.
    pub fn is_empty(&self) -> bool {
        self.attacks.is_empty()
    }

    /// Iterates the attacks in table order.
    pub fn iter(&self) -> std::slice::Iter<'_, Attack> {
        self.attacks.iter()
    }

    /// Returns the total number of flips over all attacks.
    pub fn flip_count(&self) -> usize {
        self.attacks.iter().map(|a| a.flips.len()).sum()
    }

    /// Sorts the attacks by target sequence, as required by [`Fliptable::diff`].
    /// The sort is stable.
    pub fn sort_by_targets(&mut self) {
        self.attacks.sort_by(Attack::cmp_targets);
    }

    /// Returns all attacks with addresses reverse-translated to physical memory.
    pub fn to_physmem(&self, layout: &MemoryLayout) -> Vec<PhysAttack> {
        self.attacks.iter().map(|a| a.to_physmem(layout)).collect()
    }

    /// Computes the three-way diff of two tables sorted by target sequence.
    ///
    /// Attacks on targets present in both tables are diffed flip by flip: non-empty
    /// differences go to the respective "only" table and the common part always goes to
    /// `common`, even without flips, so it lists every shared target. Attacks on targets
    /// present in only one table go entirely to that table's "only" output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetMismatch`] if either table is not sorted by targets (see
    /// [`Fliptable::sort_by_targets`]).
    pub fn diff(&self, other: &Fliptable) -> Result<Diff<Fliptable>> {
        check_sorted(&self.attacks)?;
        check_sorted(&other.attacks)?;

        let mut uself = vec![];
        let mut common = vec![];
        let mut uother = vec![];

        let (mut i, mut j) = (0, 0);
        loop {
            match (self.attacks.get(i), other.attacks.get(j)) {
                (None, None) => break,
                (Some(_), None) => {
                    uself.extend_from_slice(&self.attacks[i..]);
                    break;
                }
                (None, Some(_)) => {
                    uother.extend_from_slice(&other.attacks[j..]);
                    break;
                }
                (Some(sa), Some(oa)) => match sa.cmp_targets(oa) {
                    Ordering::Equal => {
                        let adiff = sa.diff(oa)?;
                        if !adiff.self_only.flips.is_empty() {
                            uself.push(adiff.self_only);
                        }
                        common.push(adiff.common);
                        if !adiff.other_only.flips.is_empty() {
                            uother.push(adiff.other_only);
                        }
                        i += 1;
                        j += 1;
                    }
                    Ordering::Less => {
                        uself.push(sa.clone());
                        i += 1;
                    }
                    Ordering::Greater => {
                        uother.push(oa.clone());
                        j += 1;
                    }
                },
            }
        }
        debug!(
            "diff: {} only in self, {} common, {} only in other",
            uself.len(),
            common.len(),
            uother.len()
        );
        Ok(Diff {
            self_only: Fliptable::new(uself),
            common: Fliptable::new(common),
            other_only: Fliptable::new(uother),
        })
    }
}

/// Fails with [`Error::TargetMismatch`] on the first pair of attacks out of target order.
fn check_sorted(attacks: &[Attack]) -> Result<()> {
    match attacks
        .windows(2)
        .find(|w| w[0].cmp_targets(&w[1]) == Ordering::Greater)
    {
        Some(w) => Err(Error::TargetMismatch {
            left: w[0].targets.clone(),
            right: w[1].targets.clone(),
        }),
        None => Ok(()),
    }
}

impl Fliptable {
    /// Reads a fliptable report. The input is read completely before decoding.
    ///
    /// The first `#` line holding `key: value` pairs is kept as [`Parameters`].
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or a line cannot be decoded.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let lines = reader.lines().collect::<std::io::Result<Vec<_>>>()?;
        let params = lines
            .iter()
            .map(|l| l.trim())
            .take_while(|l| l.is_empty() || l.starts_with('#'))
            .find_map(Parameters::parse);
        let attacks = decode_lines(&lines).collect::<Result<Vec<_>>>()?;
        Ok(Fliptable { attacks, params })
    }

    /// Loads a fliptable report from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let table = Fliptable::from_reader(BufReader::new(file))?;
        info!(
            "Loaded {} attacks with {} flips from {}",
            table.len(),
            table.flip_count(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Writes the encoded table to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self)?;
        writer.flush()?;
        info!("Saved {} attacks to {}", self.len(), path.as_ref().display());
        Ok(())
    }
}

impl FromStr for Fliptable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Fliptable::from_reader(s.as_bytes())
    }
}

/// Encodes every attack with [`Attack::encode`], one block per attack.
impl Display for Fliptable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, attack) in self.attacks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", attack.encode())?;
        }
        Ok(())
    }
}

/// Concatenates two tables. Parameters of the left table are kept.
impl Add for Fliptable {
    type Output = Fliptable;

    fn add(mut self, rhs: Fliptable) -> Fliptable {
        self.attacks.extend(rhs.attacks);
        self
    }
}

impl FromIterator<Attack> for Fliptable {
    fn from_iter<T: IntoIterator<Item = Attack>>(iter: T) -> Self {
        Fliptable::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Fliptable {
    type Item = Attack;
    type IntoIter = std::vec::IntoIter<Attack>;

    fn into_iter(self) -> Self::IntoIter {
        self.attacks.into_iter()
    }
}

impl<'a> IntoIterator for &'a Fliptable {
    type Item = &'a Attack;
    type IntoIter = std::slice::Iter<'a, Attack>;

    fn into_iter(self) -> Self::IntoIter {
        self.attacks.iter()
    }
}
