//! Interpreter for the textual statement grammar rendered by [`crate::expr`], used only by the
//! in-memory reference store to replay `BatchExecuteStatement`-style calls.
//!
//! This is not a general-purpose SQL parser: it understands exactly the shapes
//! [`crate::expr::build_insert_statement`], [`crate::expr::build_update_statement`], and
//! [`crate::expr::build_delete_by_key_statement`]/`build_delete_by_item_statement` produce, and
//! inherits the same no-escaping caveat (a literal containing `" SET \""` or `" AND "` as text
//! would confuse the clause/condition splitter).

use std::collections::{BTreeMap, HashMap};

use crate::error::RowVaultError;
use crate::row::PrimaryKey;
use crate::value::{AttributeMap, AttributeValue, PathSegment};

type Partition = BTreeMap<String, AttributeMap>;

pub(super) fn apply(data: &mut HashMap<String, Partition>, statement: &str) -> Result<(), RowVaultError> {
    if let Some(rest) = statement.strip_prefix("INSERT INTO \"") {
        apply_insert(data, rest)
    } else if let Some(rest) = statement.strip_prefix("UPDATE \"") {
        apply_update(data, rest)
    } else if let Some(rest) = statement.strip_prefix("DELETE FROM \"") {
        apply_delete(data, rest)
    } else {
        Err(bad_statement(statement))
    }
}

fn bad_statement(statement: &str) -> RowVaultError {
    RowVaultError::UnexpectedResponse {
        reason: format!("unrecognized statement: {statement}"),
    }
}

fn split_table_name(rest: &str) -> Result<(&str, &str), RowVaultError> {
    let end = rest.find('"').ok_or_else(|| bad_statement(rest))?;
    Ok((&rest[..end], &rest[end + 1..]))
}

fn apply_insert(data: &mut HashMap<String, Partition>, rest: &str) -> Result<(), RowVaultError> {
    let (_table, after_table) = split_table_name(rest)?;
    let literal = after_table
        .strip_prefix(" value ")
        .ok_or_else(|| bad_statement(rest))?;
    let value = parse_value_str(literal.trim())?;
    let AttributeValue::M(item) = value else {
        return Err(bad_statement(rest));
    };
    let key = key_from_item(&item)?;

    let partition = data.entry(key.partition_key.clone()).or_default();
    if partition.contains_key(&key.sort_key) {
        return Err(RowVaultError::ConditionalCheckFailed {
            partition_key: key.partition_key,
            sort_key: key.sort_key,
            message: "Row already exists.".to_string(),
        });
    }
    partition.insert(key.sort_key, item);
    Ok(())
}

/// The INSERT grammar carries no schema metadata, so the interpreter can't learn a table's actual
/// key attribute names from the statement text alone. It requires "PK"/"SK" (see DESIGN.md).
fn key_from_item(item: &AttributeMap) -> Result<PrimaryKey, RowVaultError> {
    let pk = match item.get("PK") {
        Some(AttributeValue::S(s)) => s.clone(),
        _ => {
            return Err(RowVaultError::UnexpectedResponse {
                reason: "insert statement item missing partition key attribute \"PK\"".to_string(),
            })
        }
    };
    let sk = match item.get("SK") {
        Some(AttributeValue::S(s)) => s.clone(),
        _ => {
            return Err(RowVaultError::UnexpectedResponse {
                reason: "insert statement item missing sort key attribute \"SK\"".to_string(),
            })
        }
    };
    Ok(PrimaryKey::new(pk, sk))
}

fn apply_update(data: &mut HashMap<String, Partition>, rest: &str) -> Result<(), RowVaultError> {
    let (_table, after_table) = split_table_name(rest)?;
    let after_table = after_table.strip_prefix(' ').unwrap_or(after_table);
    let where_idx = after_table.find(" WHERE ").ok_or_else(|| bad_statement(rest))?;
    let clauses_str = &after_table[..where_idx];
    let where_str = &after_table[where_idx + " WHERE ".len()..];

    let (pk, sk, row_version) = parse_where(where_str)?;
    let clauses = split_clauses(clauses_str)
        .into_iter()
        .map(parse_clause)
        .collect::<Result<Vec<_>, _>>()?;

    let key = PrimaryKey::new(pk, sk);
    let partition = data
        .get_mut(&key.partition_key)
        .ok_or_else(|| conditional_check_failed(&key, "Existing item does not exist."))?;
    let item = partition
        .get_mut(&key.sort_key)
        .ok_or_else(|| conditional_check_failed(&key, "Existing item does not exist."))?;

    if let Some(expected) = row_version {
        let actual = match item.get("rowVersion") {
            Some(AttributeValue::N(n)) => n.clone(),
            _ => {
                return Err(RowVaultError::UnexpectedResponse {
                    reason: "stored item missing rowVersion".to_string(),
                })
            }
        };
        if actual != expected.to_string() {
            return Err(conditional_check_failed(&key, "Trying to overwrite incorrect version."));
        }
    }

    apply_clauses(item, clauses)
}

fn apply_delete(data: &mut HashMap<String, Partition>, rest: &str) -> Result<(), RowVaultError> {
    let (_table, after_table) = split_table_name(rest)?;
    let after_table = after_table.strip_prefix(' ').unwrap_or(after_table);
    let where_str = after_table
        .strip_prefix("WHERE ")
        .ok_or_else(|| bad_statement(rest))?;

    let (pk, sk, row_version) = parse_where(where_str)?;
    let key = PrimaryKey::new(pk, sk);

    if let Some(expected) = row_version {
        let partition = data
            .get(&key.partition_key)
            .ok_or_else(|| conditional_check_failed(&key, "Existing item does not exist."))?;
        let item = partition
            .get(&key.sort_key)
            .ok_or_else(|| conditional_check_failed(&key, "Existing item does not exist."))?;
        let actual = match item.get("rowVersion") {
            Some(AttributeValue::N(n)) => n.clone(),
            _ => {
                return Err(RowVaultError::UnexpectedResponse {
                    reason: "stored item missing rowVersion".to_string(),
                })
            }
        };
        if actual != expected.to_string() {
            return Err(conditional_check_failed(&key, "Trying to delete incorrect version."));
        }
    }

    if let Some(partition) = data.get_mut(&key.partition_key) {
        partition.remove(&key.sort_key);
    }
    Ok(())
}

fn conditional_check_failed(key: &PrimaryKey, message: &str) -> RowVaultError {
    RowVaultError::ConditionalCheckFailed {
        partition_key: key.partition_key.clone(),
        sort_key: key.sort_key.clone(),
        message: message.to_string(),
    }
}

/// Split a `WHERE` clause body into `(partition_key_value, sort_key_value, row_version)`.
fn parse_where(where_str: &str) -> Result<(String, String, Option<u64>), RowVaultError> {
    let mut key_values = Vec::new();
    let mut row_version = None;
    for part in where_str.split(" AND ") {
        let (name, value) = part.split_once('=').ok_or_else(|| bad_statement(where_str))?;
        if name == "rowVersion" {
            row_version = Some(value.parse::<u64>().map_err(|_| bad_statement(where_str))?);
        } else {
            key_values.push(strip_quotes(value).to_string());
        }
    }
    if key_values.len() != 2 {
        return Err(bad_statement(where_str));
    }
    Ok((key_values.remove(0), key_values.remove(0), row_version))
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')).unwrap_or(s)
}

enum Clause {
    Update(Vec<PathSegment>, AttributeValue),
    Remove(Vec<PathSegment>),
    ListAppend(Vec<PathSegment>, AttributeValue),
}

/// Split the space-joined clause list into individual `SET "..."=...` / `REMOVE "..."` clauses.
fn split_clauses(clauses_str: &str) -> Vec<&str> {
    let mut boundaries = vec![0usize];
    let bytes = clauses_str.as_bytes();
    for i in 1..clauses_str.len() {
        if (clauses_str[i..].starts_with("SET \"") || clauses_str[i..].starts_with("REMOVE \""))
            && bytes[i - 1] == b' '
        {
            boundaries.push(i);
        }
    }
    boundaries.push(clauses_str.len());
    boundaries
        .windows(2)
        .filter_map(|w| {
            let seg = clauses_str[w[0]..w[1]].trim_end();
            (!seg.is_empty()).then_some(seg)
        })
        .collect()
}

fn parse_clause(clause: &str) -> Result<Clause, RowVaultError> {
    if let Some(rest) = clause.strip_prefix("REMOVE \"") {
        let end = rest.find('"').ok_or_else(|| bad_statement(clause))?;
        return Ok(Clause::Remove(parse_path(&rest[..end])));
    }
    if let Some(rest) = clause.strip_prefix("SET \"") {
        let end = rest.find('"').ok_or_else(|| bad_statement(clause))?;
        let path_str = &rest[..end];
        let after_path = &rest[end + 1..];
        let value_part = after_path.strip_prefix('=').ok_or_else(|| bad_statement(clause))?;
        if let Some(inner) = value_part
            .strip_prefix("list_append(")
            .and_then(|s| s.strip_suffix(')'))
        {
            let comma = find_top_level_comma(inner).ok_or_else(|| bad_statement(clause))?;
            let list_literal = &inner[comma + 1..];
            let value = parse_value_str(list_literal)?;
            return Ok(Clause::ListAppend(parse_path(path_str), value));
        }
        let value = parse_value_str(value_part)?;
        return Ok(Clause::Update(parse_path(path_str), value));
    }
    Err(bad_statement(clause))
}

fn find_top_level_comma(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '[' | '{' if !in_string => depth += 1,
            ']' | '}' if !in_string => depth -= 1,
            ',' if !in_string && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_path(s: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut digits = String::new();
                for d in chars.by_ref() {
                    if d == ']' {
                        break;
                    }
                    digits.push(d);
                }
                if let Ok(idx) = digits.parse::<usize>() {
                    segments.push(PathSegment::Index(idx));
                }
            }
            other => key.push(other),
        }
    }
    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    }
    segments
}

enum ParentRef<'a> {
    Map(&'a mut AttributeMap),
    List(&'a mut Vec<AttributeValue>),
}

fn resolve_parent<'a>(root: &'a mut AttributeMap, parent_path: &[PathSegment]) -> Result<ParentRef<'a>, RowVaultError> {
    if parent_path.is_empty() {
        return Ok(ParentRef::Map(root));
    }
    let mut current: &mut AttributeValue = match &parent_path[0] {
        PathSegment::Key(k) => root.get_mut(k).ok_or_else(path_missing)?,
        PathSegment::Index(_) => return Err(path_mismatch()),
    };
    for seg in &parent_path[1..] {
        current = match (current, seg) {
            (AttributeValue::M(m), PathSegment::Key(k)) => m.get_mut(k).ok_or_else(path_missing)?,
            (AttributeValue::L(l), PathSegment::Index(i)) => l.get_mut(*i).ok_or_else(path_missing)?,
            _ => return Err(path_mismatch()),
        };
    }
    match current {
        AttributeValue::M(m) => Ok(ParentRef::Map(m)),
        AttributeValue::L(l) => Ok(ParentRef::List(l)),
        _ => Err(path_mismatch()),
    }
}

fn resolve_value<'a>(root: &'a mut AttributeMap, path: &[PathSegment]) -> Result<&'a mut AttributeValue, RowVaultError> {
    let mut current: &mut AttributeValue = match path.first() {
        Some(PathSegment::Key(k)) => root.get_mut(k).ok_or_else(path_missing)?,
        _ => return Err(path_mismatch()),
    };
    for seg in &path[1..] {
        current = match (current, seg) {
            (AttributeValue::M(m), PathSegment::Key(k)) => m.get_mut(k).ok_or_else(path_missing)?,
            (AttributeValue::L(l), PathSegment::Index(i)) => l.get_mut(*i).ok_or_else(path_missing)?,
            _ => return Err(path_mismatch()),
        };
    }
    Ok(current)
}

fn path_missing() -> RowVaultError {
    RowVaultError::UnexpectedResponse {
        reason: "update/remove path does not exist on the stored item".to_string(),
    }
}

fn path_mismatch() -> RowVaultError {
    RowVaultError::UnexpectedResponse {
        reason: "update/remove path does not match the stored item's shape".to_string(),
    }
}

fn apply_clauses(item: &mut AttributeMap, clauses: Vec<Clause>) -> Result<(), RowVaultError> {
    let mut index_removes: Vec<(Vec<PathSegment>, usize)> = Vec::new();
    let mut rest: Vec<Clause> = Vec::new();

    for clause in clauses {
        match clause {
            Clause::Remove(path) => match path.last() {
                Some(PathSegment::Index(i)) => index_removes.push((path.clone(), *i)),
                _ => rest.push(Clause::Remove(path)),
            },
            other => rest.push(other),
        }
    }

    for clause in rest {
        match clause {
            Clause::Update(path, value) => {
                let (last, parent_path) = path.split_last().ok_or_else(path_mismatch)?;
                let parent = resolve_parent(item, parent_path)?;
                match (parent, last) {
                    (ParentRef::Map(m), PathSegment::Key(k)) => {
                        m.insert(k.clone(), value);
                    }
                    (ParentRef::List(l), PathSegment::Index(i)) => {
                        if *i < l.len() {
                            l[*i] = value;
                        } else if *i == l.len() {
                            l.push(value);
                        } else {
                            return Err(path_mismatch());
                        }
                    }
                    _ => return Err(path_mismatch()),
                }
            }
            Clause::ListAppend(path, value) => {
                let AttributeValue::L(new_items) = value else {
                    return Err(path_mismatch());
                };
                let target = resolve_value(item, &path)?;
                match target {
                    AttributeValue::L(l) => l.extend(new_items),
                    _ => return Err(path_mismatch()),
                }
            }
            Clause::Remove(_) => unreachable!("index removes were filtered out above"),
        }
    }

    // Remove list indices from highest to lowest so earlier removals don't shift later targets.
    index_removes.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, index) in index_removes {
        let (last, parent_path) = path.split_last().ok_or_else(path_mismatch)?;
        debug_assert!(matches!(last, PathSegment::Index(i) if *i == index));
        let parent = resolve_parent(item, parent_path)?;
        if let ParentRef::List(l) = parent {
            if index < l.len() {
                l.remove(index);
            }
        }
    }

    Ok(())
}

// --- literal value parser -----------------------------------------------------------------

pub(super) fn parse_value_str(s: &str) -> Result<AttributeValue, RowVaultError> {
    let mut parser = Parser { s, pos: 0 };
    let value = parser.parse_value()?;
    parser.skip_ws();
    if parser.pos != parser.s.len() {
        return Err(bad_statement(s));
    }
    Ok(value)
}

struct Parser<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += self.peek().unwrap().len_utf8();
        }
    }

    fn parse_value(&mut self) -> Result<AttributeValue, RowVaultError> {
        self.skip_ws();
        match self.peek() {
            Some('\'') => self.parse_string().map(AttributeValue::S),
            Some('[') => self.parse_list().map(AttributeValue::L),
            Some('{') => self.parse_map().map(AttributeValue::M),
            Some('t') if self.rest().starts_with("true") => {
                self.pos += 4;
                Ok(AttributeValue::Bool(true))
            }
            Some('f') if self.rest().starts_with("false") => {
                self.pos += 5;
                Ok(AttributeValue::Bool(false))
            }
            Some('n') if self.rest().starts_with("null") => {
                self.pos += 4;
                Ok(AttributeValue::Null)
            }
            Some(_) => self.parse_number().map(AttributeValue::N),
            None => Err(bad_statement(self.s)),
        }
    }

    fn parse_string(&mut self) -> Result<String, RowVaultError> {
        self.pos += 1; // opening quote
        let start = self.pos;
        let end = self.rest().find('\'').ok_or_else(|| bad_statement(self.s))?;
        let value = self.s[start..start + end].to_string();
        self.pos = start + end + 1; // closing quote
        Ok(value)
    }

    fn parse_number(&mut self) -> Result<String, RowVaultError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
            self.pos += self.peek().unwrap().len_utf8();
        }
        if self.pos == start {
            return Err(bad_statement(self.s));
        }
        Ok(self.s[start..self.pos].to_string())
    }

    fn parse_list(&mut self) -> Result<Vec<AttributeValue>, RowVaultError> {
        self.pos += 1; // '['
        let mut out = Vec::new();
        self.skip_ws();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            out.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                    self.skip_ws();
                }
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(bad_statement(self.s)),
            }
        }
        Ok(out)
    }

    fn parse_map(&mut self) -> Result<AttributeMap, RowVaultError> {
        self.pos += 1; // '{'
        let mut out = AttributeMap::new();
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(out);
        }
        loop {
            self.skip_ws();
            let key = self.parse_string()?;
            self.skip_ws();
            if self.peek() != Some(':') {
                return Err(bad_statement(self.s));
            }
            self.pos += 1;
            self.skip_ws();
            let value = self.parse_value()?;
            out.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(bad_statement(self.s)),
            }
        }
        Ok(out)
    }
}
