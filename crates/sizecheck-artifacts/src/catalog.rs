//! The artifact registry.
//!
//! Each row carries five fields: `name,url,mask,kind,targets`. `targets` is a
//! list of `member:destination` pairs joined with `@`; raw downloads leave the
//! member empty (`:destination`).

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::test_type::TestTypeMask;

const FIELD_COUNT: usize = 5;
const TARGET_SEPARATOR: char = '@';
const MEMBER_SEPARATOR: char = ':';

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog row {row}: {message}")]
    Parse { row: usize, message: String },
    #[error("{action} catalog {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Raw,
    Tar,
    Zip,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Raw => "raw",
            ArtifactKind::Tar => "tar",
            ArtifactKind::Zip => "zip",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(ArtifactKind::Raw),
            "tar" => Some(ArtifactKind::Tar),
            "zip" => Some(ArtifactKind::Zip),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file materialized from an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Base name of the archive member; `None` for raw downloads.
    pub member: Option<String>,
    pub destination: PathBuf,
}

impl Target {
    pub fn raw(destination: impl Into<PathBuf>) -> Self {
        Self {
            member: None,
            destination: destination.into(),
        }
    }

    pub fn member(member: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            member: Some(member.into()),
            destination: destination.into(),
        }
    }

    /// Member name, or the destination file name for raw targets.
    pub fn display_name(&self) -> String {
        if let Some(member) = &self.member {
            return member.clone();
        }
        self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn encode(&self) -> String {
        format!(
            "{}{MEMBER_SEPARATOR}{}",
            self.member.as_deref().unwrap_or(""),
            self.destination.to_string_lossy()
        )
    }

    fn decode(s: &str) -> Result<Self, String> {
        let Some((member, dest)) = s.split_once(MEMBER_SEPARATOR) else {
            return Err(format!("target {s:?} is not of the form member:path"));
        };
        if dest.is_empty() {
            return Err(format!("target {s:?} has an empty destination"));
        }
        Ok(Self {
            member: (!member.is_empty()).then(|| member.to_string()),
            destination: PathBuf::from(dest),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub name: String,
    pub url: String,
    pub test_types: TestTypeMask,
    pub kind: ArtifactKind,
    pub targets: Vec<Target>,
}

impl ArtifactRecord {
    pub fn to_row(&self) -> Vec<String> {
        let targets: Vec<String> = self.targets.iter().map(Target::encode).collect();
        vec![
            self.name.clone(),
            self.url.clone(),
            self.test_types.bits().to_string(),
            self.kind.as_str().to_string(),
            targets.join(&TARGET_SEPARATOR.to_string()),
        ]
    }

    pub fn from_row<S: AsRef<str>>(row: &[S]) -> Result<Self, String> {
        if row.len() != FIELD_COUNT {
            return Err(format!(
                "expected {FIELD_COUNT} fields, found {}",
                row.len()
            ));
        }
        let field = |i: usize| row[i].as_ref().trim();

        let name = field(0);
        if name.is_empty() {
            return Err("artifact name must be non-empty".to_string());
        }
        let url = field(1);
        if url.is_empty() {
            return Err(format!("artifact {name}: url must be non-empty"));
        }
        let bits: u32 = field(2)
            .parse()
            .map_err(|_| format!("artifact {name}: test type mask {:?} is not an integer", field(2)))?;
        let test_types = TestTypeMask::from_bits(bits)
            .ok_or_else(|| format!("artifact {name}: test type mask {bits} has unknown bits"))?;
        let kind = ArtifactKind::parse(field(3))
            .ok_or_else(|| format!("artifact {name}: unknown archive kind {:?}", field(3)))?;

        let targets_field = field(4);
        if targets_field.is_empty() {
            return Err(format!("artifact {name}: no targets"));
        }
        let targets = targets_field
            .split(TARGET_SEPARATOR)
            .map(Target::decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("artifact {name}: {e}"))?;

        match kind {
            ArtifactKind::Raw => {
                if targets.len() != 1 {
                    return Err(format!(
                        "artifact {name}: raw downloads take exactly one target, found {}",
                        targets.len()
                    ));
                }
            }
            ArtifactKind::Tar | ArtifactKind::Zip => {
                if let Some(t) = targets.iter().find(|t| t.member.is_none()) {
                    return Err(format!(
                        "artifact {name}: archive target {} needs a member name",
                        t.destination.display()
                    ));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            test_types,
            kind,
            targets,
        })
    }

    /// Name of the test case derived from `target`.
    pub fn case_name(&self, target: &Target) -> String {
        if self.targets.len() == 1 {
            return self.name.clone();
        }
        format!("{}-{}", self.name, target.display_name())
    }

    pub fn case_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| self.case_name(t)).collect()
    }
}

impl fmt::Display for ArtifactRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.kind, self.url)
    }
}

/// Parses rows numbered from 1.
pub fn parse<R, S>(rows: &[R]) -> Result<Vec<ArtifactRecord>, CatalogError>
where
    R: AsRef<[S]>,
    S: AsRef<str>,
{
    collect_records(
        rows.iter()
            .enumerate()
            .map(|(idx, row)| (idx + 1, ArtifactRecord::from_row(row.as_ref()))),
    )
}

pub fn serialize(records: &[ArtifactRecord]) -> Vec<Vec<String>> {
    records.iter().map(ArtifactRecord::to_row).collect()
}

/// Parses CSV text; row numbers in errors are line numbers.
pub fn parse_csv(text: &str) -> Result<Vec<ArtifactRecord>, CatalogError> {
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line).map_err(|message| CatalogError::Parse {
            row: idx + 1,
            message,
        })?;
        rows.push((idx + 1, fields));
    }
    collect_records(
        rows.iter()
            .map(|(n, fields)| (*n, ArtifactRecord::from_row(fields.as_slice()))),
    )
}

pub fn to_csv(records: &[ArtifactRecord]) -> String {
    let mut out = String::new();
    for row in serialize(records) {
        let fields: Vec<String> = row.iter().map(|f| quote_csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

pub fn load(path: &Path) -> Result<Vec<ArtifactRecord>, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&text)
}

pub fn save(path: &Path, records: &[ArtifactRecord]) -> Result<(), CatalogError> {
    let io_err = |source| CatalogError::Io {
        action: "write",
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, to_csv(records)).map_err(io_err)
}

fn collect_records<I>(rows: I) -> Result<Vec<ArtifactRecord>, CatalogError>
where
    I: IntoIterator<Item = (usize, Result<ArtifactRecord, String>)>,
{
    let mut out = Vec::new();
    let mut destinations: BTreeSet<PathBuf> = BTreeSet::new();
    for (row, parsed) in rows {
        let record = parsed.map_err(|message| CatalogError::Parse { row, message })?;
        for target in &record.targets {
            if !destinations.insert(target.destination.clone()) {
                return Err(CatalogError::Parse {
                    row,
                    message: format!(
                        "destination {} is already used by another target",
                        target.destination.display()
                    ),
                });
            }
        }
        out.push(record);
    }
    Ok(out)
}

fn split_csv_line(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    let mut quoted_field = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    cur.push('"');
                }
                '"' => in_quotes = false,
                _ => cur.push(c),
            }
            continue;
        }
        match c {
            '"' if cur.is_empty() && !quoted_field => {
                in_quotes = true;
                quoted_field = true;
            }
            ',' => {
                fields.push(std::mem::take(&mut cur));
                quoted_field = false;
            }
            _ => cur.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(cur);
    Ok(fields)
}

fn quote_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_type::TestType;

    fn demo() -> ArtifactRecord {
        ArtifactRecord {
            name: "demo".to_string(),
            url: "https://example/demo.tar.gz".to_string(),
            test_types: TestType::Text | TestType::Json,
            kind: ArtifactKind::Tar,
            targets: vec![Target::member("demo", "demo")],
        }
    }

    #[test]
    fn parses_scenario_row() {
        let records =
            parse(&[["demo", "https://example/demo.tar.gz", "3", "tar", "demo:demo"]]).expect("parse");
        assert_eq!(records, vec![demo()]);
    }

    #[test]
    fn round_trips_through_rows_and_csv() {
        let records = vec![
            demo(),
            ArtifactRecord {
                name: "bin-linux".to_string(),
                url: "https://github.com/o/r/releases/download/latest/bin-linux?a=1,b=2".to_string(),
                test_types: TestType::Text.into(),
                kind: ArtifactKind::Raw,
                targets: vec![Target::raw("bin-linux")],
            },
            ArtifactRecord {
                name: "cockroach".to_string(),
                url: "https://example/cockroach.zip".to_string(),
                test_types: TestType::Json | TestType::Svg,
                kind: ArtifactKind::Zip,
                targets: vec![
                    Target::member("cockroach.exe", "cockroach-windows"),
                    Target::member("libgeos.dll", "nested/libgeos.dll"),
                ],
            },
        ];
        assert_eq!(parse(&serialize(&records)).expect("rows"), records);
        assert_eq!(parse_csv(&to_csv(&records)).expect("csv"), records);
    }

    #[test]
    fn raw_target_uses_empty_member() {
        let row = ArtifactRecord {
            name: "raw".to_string(),
            url: "https://example/raw".to_string(),
            test_types: TestType::Text.into(),
            kind: ArtifactKind::Raw,
            targets: vec![Target::raw("raw-bin")],
        }
        .to_row();
        assert_eq!(row[4], ":raw-bin");
    }

    #[test]
    fn malformed_rows_name_the_row() {
        let cases: Vec<(Vec<&str>, &str)> = vec![
            (vec!["a", "u", "1", "raw"], "expected 5 fields"),
            (vec!["a", "u", "x", "raw", ":a"], "not an integer"),
            (vec!["a", "u", "99", "raw", ":a"], "unknown bits"),
            (vec!["a", "u", "1", "rar", ":a"], "unknown archive kind"),
            (vec!["a", "u", "1", "tar", "nocolon"], "member:path"),
            (vec!["a", "u", "1", "tar", ":a"], "needs a member name"),
            (vec!["a", "u", "1", "raw", ":a@:b"], "exactly one target"),
        ];
        for (row, needle) in cases {
            let good = vec!["ok", "u", "1", "raw", ":ok"];
            let err = parse(&[good, row.clone()]).unwrap_err();
            match &err {
                CatalogError::Parse { row: n, message } => {
                    assert_eq!(*n, 2, "row={row:?}");
                    assert!(message.contains(needle), "row={row:?} message={message}");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn duplicate_destinations_are_rejected() {
        let err = parse_csv("a,u,1,raw,:same\nb,u,1,raw,:same\n").unwrap_err();
        assert!(
            matches!(err, CatalogError::Parse { row: 2, .. }),
            "err={err}"
        );
    }

    #[test]
    fn csv_errors_report_line_numbers_and_skip_blank_lines() {
        let err = parse_csv("a,u,1,raw,:a\n\n\"b,u,1,raw,:b\n").unwrap_err();
        assert!(matches!(err, CatalogError::Parse { row: 3, .. }), "err={err}");
    }

    #[test]
    fn case_names_follow_target_count() {
        let single = demo();
        assert_eq!(single.case_names(), vec!["demo".to_string()]);

        let mut multi = demo();
        multi.targets.push(Target::member("demo2", "demo2"));
        assert_eq!(
            multi.case_names(),
            vec!["demo-demo".to_string(), "demo-demo2".to_string()]
        );
    }
}
