// ─── Version strings ───
// Build plans must be reproducible, so only concrete versions are accepted.

/// Moving targets that would make two builds of the same template differ.
const FLOATING_VERSIONS: &[&str] = &["latest", "release", "snapshot", "stable", "*"];

/// Why a version string was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionProblem {
    Empty,
    Floating,
    InvalidCharacter(char),
    BadBoundary,
}

impl std::fmt::Display for VersionProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionProblem::Empty => write!(f, "must not be empty"),
            VersionProblem::Floating => write!(f, "must be a concrete version, not a moving tag"),
            VersionProblem::InvalidCharacter(c) => {
                write!(f, "contains invalid character {:?}", c)
            }
            VersionProblem::BadBoundary => {
                write!(f, "must start and end with a letter or digit")
            }
        }
    }
}

/// Accepts `1.20.4`, `5.4.102`, `3.3.0-SNAPSHOT`, `0.15.11+1.20.4`, `24w14a`.
pub fn check_version(version: &str) -> Result<(), VersionProblem> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return Err(VersionProblem::Empty);
    }
    if FLOATING_VERSIONS
        .iter()
        .any(|f| trimmed.eq_ignore_ascii_case(f))
    {
        return Err(VersionProblem::Floating);
    }
    if let Some(c) = version
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '_')))
    {
        return Err(VersionProblem::InvalidCharacter(c));
    }
    let first_ok = version.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let last_ok = version.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !first_ok || !last_ok || version.contains("..") {
        return Err(VersionProblem::BadBoundary);
    }
    Ok(())
}

/// Java major required by a Minecraft version (snapshots by year).
pub fn required_java_for_minecraft_version(minecraft_version: &str) -> u32 {
    let lower = minecraft_version.to_ascii_lowercase();
    if let Some(week_pos) = lower.find('w') {
        let year_hint = &lower[..week_pos];
        if year_hint.len() >= 2 {
            if let Ok(snapshot_year) = year_hint[year_hint.len() - 2..].parse::<u32>() {
                return if snapshot_year >= 24 { 21 } else { 17 };
            }
        }
    }

    let mut parts = minecraft_version.split('.');
    let major = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(1);
    let minor = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(20);
    let patch = parts
        .next()
        .and_then(|p| p.split('-').next())
        .and_then(|p| p.parse::<u32>().ok())
        .unwrap_or(0);

    if major > 1 || minor >= 21 || (minor == 20 && patch >= 5) {
        21
    } else if minor >= 17 {
        17
    } else {
        8
    }
}

/// Image key (`java8`, `java17`, `java21`) for a Java major.
pub fn java_key(major: u32) -> String {
    format!("java{}", major)
}
