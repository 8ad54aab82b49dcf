use std::fmt;
use std::iter::Peekable;
use std::path::{Path, PathBuf};

use crate::coords::{cross, normalize, sub, to_engine};
use crate::document::{Brush, Entity, Face, Map};

#[derive(Debug)]
pub enum MapError {
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Open { path, source } => {
                write!(f, "failed to open map {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Open { source, .. } => Some(source),
        }
    }
}

/// Everything the parser recovered from. Parsing itself never fails.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParseReport {
    pub entities: usize,
    pub brushes: usize,
    pub faces: usize,
    pub skipped_faces: usize,
    pub warnings: Vec<String>,
}

impl ParseReport {
    fn warn(&mut self, line: usize, message: impl fmt::Display) {
        self.warnings.push(format!("line {}: {}", line, message));
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedMap {
    pub map: Map,
    pub report: ParseReport,
}

pub fn load_map_file(path: impl AsRef<Path>) -> Result<ParsedMap, MapError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| MapError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_map(&String::from_utf8_lossy(&bytes)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Top,
    Entity,
    Brush,
}

pub fn parse_map(text: &str) -> ParsedMap {
    let mut map = Map::default();
    let mut report = ParseReport::default();
    let mut scope = Scope::Top;
    let mut entity = Entity::default();
    let mut brush = Brush::default();
    let mut lines = text.lines().enumerate().peekable();

    while let Some((index, raw)) = lines.next() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('/') {
            continue;
        }
        match line {
            "{" => match scope {
                Scope::Top => {
                    entity = Entity::default();
                    scope = Scope::Entity;
                }
                Scope::Entity => {
                    brush = Brush::default();
                    scope = Scope::Brush;
                }
                Scope::Brush => report.warn(line_no, "unexpected '{' inside brush"),
            },
            "}" => match scope {
                Scope::Brush => {
                    entity.brushes.push(std::mem::take(&mut brush));
                    report.brushes += 1;
                    scope = Scope::Entity;
                }
                Scope::Entity => {
                    map.entities.push(std::mem::take(&mut entity));
                    report.entities += 1;
                    scope = Scope::Top;
                }
                Scope::Top => report.warn(line_no, "unmatched '}'"),
            },
            _ => match scope {
                Scope::Entity => match parse_property(line) {
                    Some((key, value)) => {
                        entity.properties.insert(key, value);
                    }
                    None => report.warn(line_no, "ignored line inside entity"),
                },
                Scope::Brush if line.starts_with('(') => {
                    let face_text = accumulate_face(line, &mut lines);
                    match parse_face(&face_text) {
                        Ok((face, notes)) => {
                            for note in notes {
                                report.warn(line_no, note);
                            }
                            brush.faces.push(face);
                            report.faces += 1;
                        }
                        Err(reason) => {
                            report.skipped_faces += 1;
                            report.warn(line_no, format!("skipped face: {}", reason));
                        }
                    }
                }
                Scope::Brush => report.warn(line_no, "ignored line inside brush"),
                Scope::Top => report.warn(line_no, "ignored line outside entity"),
            },
        }
    }

    let last_line = text.lines().count();
    if scope == Scope::Brush {
        report.warn(last_line, "unterminated brush");
        entity.brushes.push(brush);
        report.brushes += 1;
        scope = Scope::Entity;
    }
    if scope == Scope::Entity {
        report.warn(last_line, "unterminated entity");
        map.entities.push(entity);
        report.entities += 1;
    }

    ParsedMap { map, report }
}

/// Joins continuation lines until the face has its three points, both texture axes and
/// the rotation and scale scalars, or until the next line starts another face or block.
fn accumulate_face<'a, I>(first: &str, lines: &mut Peekable<I>) -> String
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let mut face_text = first.to_string();
    loop {
        let progress = face_progress(&face_text);
        if progress == FaceProgress::Complete {
            break;
        }
        let next = match lines.peek() {
            Some(&(_, next)) => next.trim(),
            None => break,
        };
        if next == "{" || next == "}" {
            break;
        }
        if next.starts_with('(') && progress != FaceProgress::Points {
            break;
        }
        if !next.is_empty() && !next.starts_with('/') {
            face_text.push(' ');
            face_text.push_str(next);
        }
        lines.next();
    }
    face_text
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FaceProgress {
    /// Still inside or short of the three plane points.
    Points,
    /// Points are closed; texture name, axes or scalars are still missing.
    Attributes,
    Complete,
}

fn face_progress(text: &str) -> FaceProgress {
    let open_paren = count_char(text, '(');
    let close_paren = count_char(text, ')');
    if open_paren > close_paren || close_paren < 3 {
        return FaceProgress::Points;
    }
    let open_bracket = count_char(text, '[');
    let close_bracket = count_char(text, ']');
    if open_bracket > close_bracket || close_bracket < 2 {
        return FaceProgress::Attributes;
    }
    let tokens = tokenize(text);
    let scalars = tokens
        .iter()
        .rev()
        .take_while(|token| **token != Token::Close(']'))
        .filter(|token| matches!(token, Token::Word(_)))
        .count();
    if scalars < 3 {
        FaceProgress::Attributes
    } else {
        FaceProgress::Complete
    }
}

fn count_char(text: &str, needle: char) -> usize {
    text.chars().filter(|c| *c == needle).count()
}

/// `"key" "value"`, with `\"` accepted inside either string.
fn parse_property(line: &str) -> Option<(String, String)> {
    let mut strings = Vec::with_capacity(2);
    let mut chars = line.chars();
    while strings.len() < 2 {
        loop {
            match chars.next() {
                Some('"') => break,
                Some(_) => continue,
                None => return None,
            }
        }
        let mut current = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('"') => current.push('"'),
                    Some(other) => {
                        current.push('\\');
                        current.push(other);
                    }
                    None => current.push('\\'),
                },
                '"' => {
                    closed = true;
                    break;
                }
                _ => current.push(c),
            }
        }
        if !closed {
            return None;
        }
        strings.push(current);
    }
    let value = strings.pop()?;
    let key = strings.pop()?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token<'a> {
    Open(char),
    Close(char),
    Word(&'a str),
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut word_start: Option<usize> = None;
    for (index, c) in text.char_indices() {
        let punct = matches!(c, '(' | ')' | '[' | ']');
        if c.is_whitespace() || punct {
            if let Some(start) = word_start.take() {
                tokens.push(Token::Word(&text[start..index]));
            }
            match c {
                '(' | '[' => tokens.push(Token::Open(c)),
                ')' | ']' => tokens.push(Token::Close(c)),
                _ => {}
            }
        } else if word_start.is_none() {
            word_start = Some(index);
        }
    }
    if let Some(start) = word_start {
        tokens.push(Token::Word(&text[start..]));
    }
    tokens
}

struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Words between an already-consumed opener and its closer.
    fn group(&mut self, close: char) -> Option<Vec<&'a str>> {
        let mut words = Vec::new();
        loop {
            match self.next()? {
                Token::Word(word) => words.push(word),
                Token::Close(c) if c == close => return Some(words),
                _ => return None,
            }
        }
    }
}

fn parse_floats<const N: usize>(words: &[&str]) -> Option<[f32; N]> {
    if words.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, word) in out.iter_mut().zip(words) {
        let value = word.parse::<f32>().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    Some(out)
}

fn parse_face(text: &str) -> Result<(Face, Vec<String>), String> {
    let mut cursor = Cursor {
        tokens: tokenize(text),
        pos: 0,
    };
    let mut notes = Vec::new();

    let mut raw_points = [[0.0f32; 3]; 3];
    for (index, point) in raw_points.iter_mut().enumerate() {
        if cursor.next() != Some(Token::Open('(')) {
            return Err(format!("point {} is missing", index + 1));
        }
        let words = cursor
            .group(')')
            .ok_or_else(|| format!("point {} is not closed", index + 1))?;
        *point = parse_floats::<3>(&words)
            .ok_or_else(|| format!("point {} is malformed", index + 1))?;
    }

    let texture = match cursor.peek() {
        Some(Token::Word(name)) => {
            cursor.next();
            name.to_string()
        }
        _ => {
            notes.push("face has no texture name".to_string());
            String::new()
        }
    };

    let mut axes = [([0.0f32; 3], 0.0f32); 2];
    for (index, axis) in axes.iter_mut().enumerate() {
        if cursor.peek() != Some(Token::Open('[')) {
            notes.push(format!("texture axis {} is missing", index + 1));
            continue;
        }
        cursor.next();
        match cursor.group(']').as_deref().and_then(parse_floats::<4>) {
            Some([x, y, z, offset]) => *axis = ([x, y, z], offset),
            None => notes.push(format!("texture axis {} is malformed", index + 1)),
        }
    }

    let mut scalar = |label: &str, default: f32| -> f32 {
        match cursor.next() {
            Some(Token::Word(word)) => match word.parse::<f32>() {
                Ok(value) if value.is_finite() => value,
                _ => {
                    notes.push(format!("{} '{}' is malformed", label, word));
                    default
                }
            },
            _ => default,
        }
    };
    let rotation = scalar("rotation", 0.0);
    let scale_x = scalar("scale x", 1.0);
    let scale_y = scalar("scale y", 1.0);

    let [p0, p1, p2] = raw_points;
    let normal = normalize(cross(sub(p2, p0), sub(p1, p0)))
        .ok_or_else(|| "plane points are collinear".to_string())?;

    let face = Face {
        points: raw_points.map(to_engine),
        texture,
        u_axis: to_engine(axes[0].0),
        u_offset: axes[0].1,
        v_axis: to_engine(axes[1].0),
        v_offset: axes[1].1,
        rotation,
        scale: [scale_x, scale_y],
        normal: to_engine(normal),
    };
    Ok((face, notes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CUBE: &str = r#"// Game: Quake
// Format: Valve
// entity 0
{
"classname" "worldspawn"
"mapversion" "220"
// brush 0
{
( -64 -64 -16 ) ( -64 -63 -16 ) ( -64 -64 -15 ) __TB_empty [ 0 -1 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -64 -64 -16 ) ( -64 -64 -15 ) ( -63 -64 -16 ) __TB_empty [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( -64 -64 -16 ) ( -63 -64 -16 ) ( -64 -63 -16 ) __TB_empty [ -1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 64 64 16 ) ( 64 65 16 ) ( 65 64 16 ) __TB_empty [ 1 0 0 0 ] [ 0 -1 0 0 ] 0 1 1
( 64 64 16 ) ( 65 64 16 ) ( 64 64 17 ) __TB_empty [ -1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1
( 64 64 16 ) ( 64 64 17 ) ( 64 65 16 ) __TB_empty [ 0 1 0 0 ] [ 0 0 -1 0 ] 0 1 1
}
}
// entity 1
{
"classname" "info_player_start"
"origin" "0 0 40"
"angle" "180"
}
"#;

    #[test]
    fn parses_valve_cube() {
        let parsed = parse_map(CUBE);
        assert!(parsed.report.is_clean(), "{:?}", parsed.report.warnings);
        assert_eq!(parsed.report.entities, 2);
        assert_eq!(parsed.report.brushes, 1);
        assert_eq!(parsed.report.faces, 6);
        let world = parsed.map.worldspawn().expect("worldspawn");
        assert_eq!(world.get("mapversion"), Some("220"));
        let faces = &world.brushes[0].faces;
        assert_eq!(faces[0].normal, [-1.0, 0.0, 0.0]);
        // TB floor (-Z) becomes engine -Y.
        assert_eq!(faces[2].normal, [0.0, -1.0, 0.0]);
        assert_eq!(faces[2].plane().d, 16.0);
        assert_eq!(faces[3].normal, [0.0, 1.0, 0.0]);
        assert_eq!(faces[0].u_axis, [0.0, 0.0, -1.0]);
        assert_eq!(faces[0].v_axis, [0.0, -1.0, 0.0]);
        assert_eq!(faces[0].texture, "__TB_empty");
        assert_eq!(faces[0].scale, [1.0, 1.0]);
        let starts = parsed.map.player_starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].position, [0.0, 40.0, 0.0]);
        assert_eq!(starts[0].angle, Some(180.0));
    }

    #[test]
    fn every_cube_normal_points_away_from_center() {
        let parsed = parse_map(CUBE);
        let world = parsed.map.worldspawn().expect("worldspawn");
        for face in &world.brushes[0].faces {
            let plane = face.plane();
            assert!(plane.d > 0.0, "face {:?} faces inward", face.normal);
        }
    }

    #[test]
    fn joins_face_split_across_lines() {
        let text = "{\n\"classname\" \"worldspawn\"\n{\n( 0 0 0 ) ( 0 1 0 )\n( 0 0 1 ) brick\n[ 0 1 0 8 ]\n[ 0 0 -1 4 ] 45 0.5 2\n}\n}\n";
        let parsed = parse_map(text);
        assert!(parsed.report.is_clean(), "{:?}", parsed.report.warnings);
        let face = &parsed.map.entities[0].brushes[0].faces[0];
        assert_eq!(face.texture, "brick");
        assert_eq!(face.u_offset, 8.0);
        assert_eq!(face.v_offset, 4.0);
        assert_eq!(face.rotation, 45.0);
        assert_eq!(face.scale, [0.5, 2.0]);
    }

    #[test]
    fn joins_texture_name_on_its_own_line() {
        let text = "{\n{\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 )\nbrick\n[ 0 1 0 8 ] [ 0 0 -1 4 ] 45 0.5 2\n}\n}\n";
        let parsed = parse_map(text);
        assert!(parsed.report.is_clean(), "{:?}", parsed.report.warnings);
        let face = &parsed.map.entities[0].brushes[0].faces[0];
        assert_eq!(face.texture, "brick");
        assert_eq!(face.u_offset, 8.0);
        assert_eq!(face.rotation, 45.0);
        assert_eq!(face.scale, [0.5, 2.0]);
    }

    #[test]
    fn joins_scalars_on_the_following_line() {
        let text = "{\n{\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) brick [ 0 1 0 8 ] [ 0 0 -1 4 ]\n45 0.5 2\n( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) brick [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1\n}\n}\n";
        let parsed = parse_map(text);
        assert!(parsed.report.is_clean(), "{:?}", parsed.report.warnings);
        let faces = &parsed.map.entities[0].brushes[0].faces;
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].rotation, 45.0);
        assert_eq!(faces[0].scale, [0.5, 2.0]);
        assert_eq!(faces[1].u_axis, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn short_face_does_not_swallow_the_next_face() {
        let text = "{\n{\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) a [ 1 0 0 0 ] [ 0 1 0 0 ]\n( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) b [ 1 0 0 0 ] [ 0 0 -1 0 ] 0 1 1\n}\n}\n";
        let parsed = parse_map(text);
        let faces = &parsed.map.entities[0].brushes[0].faces;
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].rotation, 0.0);
        assert_eq!(faces[0].scale, [1.0, 1.0]);
        assert_eq!(faces[1].texture, "b");
    }

    #[test]
    fn bad_points_skip_only_that_face() {
        let text = "{\n{\n( 0 0 x ) ( 0 1 0 ) ( 0 0 1 ) a [ 1 0 0 0 ] [ 0 1 0 0 ] 0 1 1\n( 0 0 0 ) ( 1 0 0 ) ( 2 0 0 ) a [ 1 0 0 0 ] [ 0 1 0 0 ] 0 1 1\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) a [ 1 0 0 0 ] [ 0 1 0 0 ] 0 1 1\n}\n}\n";
        let parsed = parse_map(text);
        assert_eq!(parsed.report.skipped_faces, 2);
        assert_eq!(parsed.report.faces, 1);
        assert_eq!(parsed.map.face_count(), 1);
    }

    #[test]
    fn bad_scalars_fall_back_to_defaults() {
        let text = "{\n{\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) a [ 1 0 zz 0 ] [ 0 1 0 0 ] spin 1\n}\n}\n";
        let parsed = parse_map(text);
        let face = &parsed.map.entities[0].brushes[0].faces[0];
        assert_eq!(face.u_axis, [0.0, 0.0, 0.0]);
        assert_eq!(face.u_offset, 0.0);
        assert_eq!(face.rotation, 0.0);
        assert_eq!(face.scale, [1.0, 1.0]);
        assert_eq!(parsed.report.warnings.len(), 2);
        assert_eq!(parsed.report.skipped_faces, 0);
    }

    #[test]
    fn unterminated_blocks_are_flushed() {
        let text = "{\n\"classname\" \"worldspawn\"\n{\n( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) a [ 1 0 0 0 ] [ 0 1 0 0 ] 0 1 1\n";
        let parsed = parse_map(text);
        assert_eq!(parsed.map.entities.len(), 1);
        assert_eq!(parsed.map.brush_count(), 1);
        assert_eq!(parsed.report.warnings.len(), 2);
    }

    #[test]
    fn property_quotes_and_escapes() {
        assert_eq!(
            parse_property(r#""message" "say \"hi\"""#),
            Some(("message".to_string(), "say \"hi\"".to_string()))
        );
        assert_eq!(parse_property(r#""key" "unterminated"#), None);
        assert_eq!(parse_property("no quotes"), None);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = load_map_file("/definitely/not/here.map").unwrap_err();
        assert!(err.to_string().contains("failed to open map"));
    }

    #[test]
    fn tokenizer_splits_brackets_from_words() {
        let tokens = tokenize("(1 2)[a]");
        assert_eq!(
            tokens,
            vec![
                Token::Open('('),
                Token::Word("1"),
                Token::Word("2"),
                Token::Close(')'),
                Token::Open('['),
                Token::Word("a"),
                Token::Close(']'),
            ]
        );
    }
}
