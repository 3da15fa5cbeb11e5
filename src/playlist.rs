// --- Concat playlist ---------------------------------------------------------------
//
// ffmpeg's concat demuxer reads one `file '<path>'` directive per line. Inside
// single quotes the only special character is `'` itself, which is written as
// `'\''` (close quote, escaped quote, reopen quote).

use std::io::Write;
use std::path::Path;

use crate::catalog::CatalogItem;

/// Uniformly random permutation of `catalog`.
pub fn shuffle(catalog: &[CatalogItem]) -> Vec<CatalogItem> {
    let mut order = catalog.to_vec();
    fastrand::shuffle(&mut order);
    order
}

pub fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

pub fn concat_line(item: &CatalogItem) -> String {
    format!("file '{}'", escape_concat_path(item.path()))
}

pub fn render_concat_list(order: &[CatalogItem]) -> String {
    let mut out = String::new();
    for item in order {
        out.push_str(&concat_line(item));
        out.push('\n');
    }
    out
}

/// Write the list and make it durable before returning, so a pipeline
/// spawned right afterwards reads the complete file.
pub fn write_concat_list(path: &Path, order: &[CatalogItem]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut f = std::fs::File::create(path)?;
    f.write_all(render_concat_list(order).as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    Ok(())
}

/// Shuffle the catalog, persist it, and hand back the exact order written.
pub fn build_concat_playlist(catalog: &[CatalogItem], path: &Path) -> std::io::Result<Vec<CatalogItem>> {
    let order = shuffle(catalog);
    write_concat_list(path, &order)?;
    tracing::info!("built concat playlist at {} ({} entries)", path.display(), order.len());
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn items(names: &[&str]) -> Vec<CatalogItem> {
        names.iter().map(|n| CatalogItem::new(format!("/music/{n}"))).collect()
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let catalog = items(&["a.mp3", "b.mp3", "c.mp3", "d.mp3", "e.mp3", "f.mp3", "g.mp3"]);
        for _ in 0..50 {
            let order = shuffle(&catalog);
            assert_eq!(order.len(), catalog.len());
            let mut counts: HashMap<&CatalogItem, usize> = HashMap::new();
            for it in &order {
                *counts.entry(it).or_default() += 1;
            }
            assert!(catalog.iter().all(|it| counts.get(it) == Some(&1)));
        }
    }

    #[test]
    fn single_item_catalog() {
        let catalog = items(&["only.mp3"]);
        assert_eq!(shuffle(&catalog), catalog);
    }

    #[test]
    fn quotes_are_escaped() {
        let item = CatalogItem::new("/music/Don't Stop.mp3");
        assert_eq!(concat_line(&item), r"file '/music/Don'\''t Stop.mp3'");
    }

    #[test]
    fn persisted_file_matches_returned_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/lofi_concat.txt");
        let catalog = items(&["a.mp3", "b'b.mp3", "c.mp3"]);

        let order = build_concat_playlist(&catalog, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        let expected: Vec<String> = order.iter().map(concat_line).collect();
        assert_eq!(lines, expected);
        assert!(written.ends_with('\n'));
    }
}
