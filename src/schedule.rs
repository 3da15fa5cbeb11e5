// --- Schedule ------------------------------------------------------------------------

use crate::catalog::CatalogItem;
use crate::duration::DurationResolver;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub item: CatalogItem,
    /// Whole seconds, always >= 1.
    pub duration_secs: u32,
    pub label: String,
}

/// Timetable mirroring one persisted playlist, entry for entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    /// `order` must be the exact sequence that was written to the playlist
    /// file; the clock relies on the two matching.
    pub fn build<L>(order: &[CatalogItem], resolver: &DurationResolver, label: L) -> Self
    where
        L: Fn(&CatalogItem) -> String,
    {
        let entries: Vec<ScheduleEntry> = order
            .iter()
            .map(|item| ScheduleEntry {
                duration_secs: resolver.resolve(item).max(1),
                label: label(item),
                item: item.clone(),
            })
            .collect();

        let schedule = Self { entries };
        tracing::info!(
            "total playlist = {:.1} min ({} tracks)",
            schedule.total_secs() as f64 / 60.0,
            schedule.len()
        );
        schedule
    }

    pub fn from_entries(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_secs(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.duration_secs)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::DurationSource;
    use std::path::Path;

    struct ByName;

    impl DurationSource for ByName {
        fn name(&self) -> &'static str {
            "by-name"
        }
        fn duration_secs(&self, path: &Path) -> Option<f64> {
            match path.file_stem()?.to_str()? {
                "A" => Some(10.0),
                "B" => Some(20.0),
                _ => None,
            }
        }
    }

    #[test]
    fn entries_follow_sequenced_order() {
        let catalog: Vec<CatalogItem> = ["A.mp3", "B.mp3", "C.mp3"]
            .iter()
            .map(|n| CatalogItem::new(format!("/m/{n}")))
            .collect();
        let order = crate::playlist::shuffle(&catalog);
        let resolver = DurationResolver::new(vec![Box::new(ByName)], 180);

        let schedule = Schedule::build(&order, &resolver, |i| i.stem());
        let scheduled: Vec<&CatalogItem> = schedule.entries().iter().map(|e| &e.item).collect();
        let sequenced: Vec<&CatalogItem> = order.iter().collect();
        assert_eq!(scheduled, sequenced);

        for e in schedule.entries() {
            let expected = match e.label.as_str() {
                "A" => 10,
                "B" => 20,
                _ => 180,
            };
            assert_eq!(e.duration_secs, expected);
        }
        assert_eq!(schedule.total_secs(), 210);
    }
}
