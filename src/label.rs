// --- Now-playing labels ------------------------------------------------------------

use std::path::Path;

use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;

use crate::catalog::CatalogItem;

/// `"<artist> - <title>"` from tags, the title alone when there is no artist,
/// or the file stem when the file carries no usable title.
pub fn now_playing_label(item: &CatalogItem) -> String {
    let (artist, title) = read_tags(item.path()).unwrap_or_default();
    let title = title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| item.stem());
    let display = match artist.filter(|a| !a.trim().is_empty()) {
        Some(artist) => format!("{} - {}", artist.trim(), title.trim()),
        None => title.trim().to_string(),
    };
    escape_drawtext(&display)
}

fn read_tags(path: &Path) -> Option<(Option<String>, Option<String>)> {
    let tagged = Probe::open(path).ok()?.read().ok()?;
    let tag = tagged.primary_tag().or_else(|| tagged.first_tag())?;
    Some((
        tag.artist().map(|s| s.to_string()),
        tag.title().map(|s| s.to_string()),
    ))
}

/// Make text safe for a `drawtext` textfile: `\` escapes the next
/// character and `%` opens an expansion, so both are escaped along with `:`.
/// Line breaks become spaces; the file holds exactly one line.
pub fn escape_drawtext(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '%' => out.push_str(r"\%"),
            ':' => out.push_str(r"\:"),
            '\r' | '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
