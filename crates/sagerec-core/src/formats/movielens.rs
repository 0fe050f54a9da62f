//! MovieLens-100K loader.
//!
//! Reads the three files of the `ml-100k` layout:
//!
//! | File | Delimiter | Columns |
//! |------|-----------|---------|
//! | `u.user` | `\|` | id, age, gender, occupation, zip |
//! | `u.item` | `\|` | id, title, release date, video release, url, genre flags... |
//! | `u.data` | tab | user id, item id, rating, timestamp |
//!
//! Categorical attributes are dictionary-encoded in order of first
//! appearance. Ages are bucketed by decade, zips by their first character and
//! release dates by year (a missing date gets its own code). `u.item` is
//! Latin-1 in the official distribution, so fields are decoded lossily.

use crate::graph::RatingGraph;
use crate::node::{ItemAttrs, NodeId, UserAttrs};
use crate::{Error, Result};
use csv::{ByteRecord, ReaderBuilder};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Number of leading non-genre columns in `u.item`.
const ITEM_META_COLUMNS: usize = 5;

/// How interactions are flagged as test edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TestSplit {
    /// Every interaction is a training edge.
    None,
    /// A uniformly shuffled `fraction` of interactions is held out.
    Fraction { fraction: f64, seed: u64 },
}

impl Default for TestSplit {
    fn default() -> Self {
        Self::Fraction {
            fraction: 0.1,
            seed: 42,
        }
    }
}

/// MovieLens format handler.
pub struct MovieLens;

impl MovieLens {
    /// Load `u.user`, `u.item` and `u.data` from a directory.
    pub fn load_dir(dir: impl AsRef<Path>, split: TestSplit) -> Result<RatingGraph> {
        let dir = dir.as_ref();
        let users = File::open(dir.join("u.user"))?;
        let items = File::open(dir.join("u.item"))?;
        let ratings = File::open(dir.join("u.data"))?;
        let graph = Self::from_readers(users, items, ratings, split)?;
        tracing::info!(
            dir = %dir.display(),
            users = graph.num_users(),
            items = graph.num_items(),
            interactions = graph.interactions().len(),
            "loaded MovieLens graph"
        );
        Ok(graph)
    }

    /// Build a graph from the three tables.
    pub fn from_readers<U: Read, I: Read, D: Read>(
        users: U,
        items: I,
        ratings: D,
        split: TestSplit,
    ) -> Result<RatingGraph> {
        let user_rows = read_users(users)?;
        let item_rows = read_items(items)?;
        let rating_rows = read_ratings(ratings)?;

        let mut graph =
            RatingGraph::with_capacity(user_rows.len() + item_rows.len(), rating_rows.len());
        let mut user_ids: HashMap<u32, NodeId> = HashMap::with_capacity(user_rows.len());
        let mut item_ids: HashMap<u32, NodeId> = HashMap::with_capacity(item_rows.len());

        for (raw, attrs) in user_rows {
            let id = graph.add_user(attrs)?;
            user_ids.insert(raw, id);
        }
        for (raw, attrs) in item_rows {
            let id = graph.add_item(attrs)?;
            item_ids.insert(raw, id);
        }

        let test_flags = split.flags(rating_rows.len());
        for (row, is_test) in rating_rows.into_iter().zip(test_flags) {
            let user = *user_ids.get(&row.user).ok_or_else(|| Error::Parse {
                file: "u.data".into(),
                line: row.line,
                message: format!("unknown user id {}", row.user),
            })?;
            let item = *item_ids.get(&row.item).ok_or_else(|| Error::Parse {
                file: "u.data".into(),
                line: row.line,
                message: format!("unknown item id {}", row.item),
            })?;
            graph.add_interaction(user, item, row.rating, row.timestamp, is_test)?;
        }

        Ok(graph)
    }
}

impl TestSplit {
    /// Per-row test flags for `n` interactions.
    fn flags(&self, n: usize) -> Vec<bool> {
        let mut flags = vec![false; n];
        if let Self::Fraction { fraction, seed } = *self {
            let num_test = ((n as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(&mut XorShiftRng::seed_from_u64(seed));
            for &i in order.iter().take(num_test) {
                flags[i] = true;
            }
        }
        flags
    }
}

/// Assigns dense codes to category labels in order of first appearance.
#[derive(Debug, Default)]
struct Codebook {
    codes: HashMap<String, u32>,
}

impl Codebook {
    fn code(&mut self, label: &str) -> u32 {
        let next = self.codes.len() as u32;
        *self.codes.entry(label.to_string()).or_insert(next)
    }
}

struct RatingRow {
    user: u32,
    item: u32,
    rating: f32,
    timestamp: i64,
    line: u64,
}

fn reader<R: Read>(input: R, delimiter: u8) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(input)
}

fn line_of(record: &ByteRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn field<'r>(record: &'r ByteRecord, idx: usize, file: &str) -> Result<Cow<'r, str>> {
    record
        .get(idx)
        .map(|bytes| match String::from_utf8_lossy(bytes) {
            Cow::Borrowed(s) => Cow::Borrowed(s.trim()),
            Cow::Owned(s) => Cow::Owned(s.trim().to_string()),
        })
        .ok_or_else(|| Error::Parse {
            file: file.into(),
            line: line_of(record),
            message: format!("missing column {idx}"),
        })
}

fn parse<T: std::str::FromStr>(record: &ByteRecord, idx: usize, file: &str) -> Result<T> {
    let raw = field(record, idx, file)?;
    raw.parse().map_err(|_| Error::Parse {
        file: file.into(),
        line: line_of(record),
        message: format!("cannot parse column {idx} value {raw:?}"),
    })
}

fn read_users<R: Read>(input: R) -> Result<Vec<(u32, UserAttrs)>> {
    const FILE: &str = "u.user";
    let mut genders = Codebook::default();
    let mut occupations = Codebook::default();
    let mut zips = Codebook::default();
    let mut rows = Vec::new();

    for record in reader(input, b'|').byte_records() {
        let record = record?;
        if record.iter().all(<[u8]>::is_empty) {
            continue;
        }
        let id: u32 = parse(&record, 0, FILE)?;
        let age: u32 = parse(&record, 1, FILE)?;
        let gender = genders.code(&field(&record, 2, FILE)?);
        let occupation = occupations.code(&field(&record, 3, FILE)?);
        let zip = field(&record, 4, FILE)?;
        let zip = zips.code(zip.get(..1).unwrap_or(""));
        rows.push((
            id,
            UserAttrs {
                age: age / 10,
                gender,
                occupation,
                zip,
            },
        ));
    }
    Ok(rows)
}

fn read_items<R: Read>(input: R) -> Result<Vec<(u32, ItemAttrs)>> {
    const FILE: &str = "u.item";
    let mut years = Codebook::default();
    let mut genre_dim: Option<usize> = None;
    let mut rows = Vec::new();

    for record in reader(input, b'|').byte_records() {
        let record = record?;
        if record.iter().all(<[u8]>::is_empty) {
            continue;
        }
        if record.len() <= ITEM_META_COLUMNS {
            return Err(Error::Parse {
                file: FILE.into(),
                line: line_of(&record),
                message: format!("expected genre columns after column {ITEM_META_COLUMNS}"),
            });
        }
        let dim = record.len() - ITEM_META_COLUMNS;
        if *genre_dim.get_or_insert(dim) != dim {
            return Err(Error::Parse {
                file: FILE.into(),
                line: line_of(&record),
                message: format!(
                    "row has {dim} genre flags, earlier rows have {}",
                    genre_dim.unwrap_or(dim)
                ),
            });
        }

        let id: u32 = parse(&record, 0, FILE)?;
        let release = field(&record, 2, FILE)?;
        let year = years.code(release_year(&release).unwrap_or("unknown"));
        let genres = (ITEM_META_COLUMNS..record.len())
            .map(|idx| parse::<u8>(&record, idx, FILE).map(|flag| f32::from(flag.min(1))))
            .collect::<Result<Vec<f32>>>()?;
        rows.push((id, ItemAttrs { year, genres }));
    }
    Ok(rows)
}

/// Year part of a `dd-Mon-yyyy` release date.
fn release_year(date: &str) -> Option<&str> {
    let year = date.rsplit('-').next()?;
    (year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())).then_some(year)
}

fn read_ratings<R: Read>(input: R) -> Result<Vec<RatingRow>> {
    const FILE: &str = "u.data";
    let mut rows = Vec::new();

    for record in reader(input, b'\t').byte_records() {
        let record = record?;
        if record.iter().all(<[u8]>::is_empty) {
            continue;
        }
        rows.push(RatingRow {
            user: parse(&record, 0, FILE)?,
            item: parse(&record, 1, FILE)?,
            rating: parse(&record, 2, FILE)?,
            timestamp: parse(&record, 3, FILE)?,
            line: line_of(&record),
        });
    }
    Ok(rows)
}
