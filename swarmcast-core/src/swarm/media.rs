//! Media file filtering over a swarm file table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::SwarmFile;

/// Extensions treated as playable media, lowercase without the dot.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];

/// A playable file inside a swarm resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFileRef {
    pub name: String,
    pub length: u64,
    pub path: String,
    /// Ordinal in the engine's file table
    pub index: usize,
}

impl From<&SwarmFile> for MediaFileRef {
    fn from(file: &SwarmFile) -> Self {
        Self {
            name: file.name.clone(),
            length: file.length,
            path: file.path.clone(),
            index: file.index,
        }
    }
}

/// Checks whether a file name carries a media extension.
pub fn is_media_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Filters a file table down to media files, largest first.
///
/// The sort is stable, so equally sized files keep their engine order.
pub fn media_files(files: &[SwarmFile]) -> Vec<MediaFileRef> {
    let mut media: Vec<MediaFileRef> = files
        .iter()
        .filter(|file| is_media_file(&file.name))
        .map(MediaFileRef::from)
        .collect();
    media.sort_by(|a, b| b.length.cmp(&a.length));
    media
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn file(index: usize, name: &str, length: u64) -> SwarmFile {
        SwarmFile {
            index,
            name: name.to_string(),
            length,
            path: format!("Movie/{name}"),
        }
    }

    #[test]
    fn test_media_extension_matching() {
        assert!(is_media_file("movie.mp4"));
        assert!(is_media_file("MOVIE.MKV"));
        assert!(is_media_file("clip.final.webm"));
        assert!(!is_media_file("readme.txt"));
        assert!(!is_media_file("mp4"));
        assert!(!is_media_file("subs.srt"));
    }

    #[test]
    fn test_filters_and_orders_largest_first() {
        let files = vec![
            file(0, "a.txt", 100),
            file(1, "movie.mp4", 5_000_000),
            file(2, "sample.mp4", 1_000),
        ];

        let media = media_files(&files);

        assert_eq!(media.len(), 2);
        assert_eq!(media[0].name, "movie.mp4");
        assert_eq!(media[0].index, 1);
        assert_eq!(media[1].name, "sample.mp4");
        assert_eq!(media[1].index, 2);
    }

    #[test]
    fn test_no_media_files() {
        let files = vec![file(0, "a.txt", 100), file(1, "cover.jpg", 2_000)];
        assert!(media_files(&files).is_empty());
    }

    proptest! {
        #[test]
        fn prop_media_files_sorted_descending(
            entries in prop::collection::vec(
                (prop::sample::select(vec!["mp4", "mkv", "txt", "nfo", "avi"]), 0u64..10_000_000),
                0..40,
            )
        ) {
            let files: Vec<SwarmFile> = entries
                .iter()
                .enumerate()
                .map(|(index, (ext, length))| file(index, &format!("f{index}.{ext}"), *length))
                .collect();

            let media = media_files(&files);

            prop_assert!(media.windows(2).all(|pair| pair[0].length >= pair[1].length));
            prop_assert!(media.iter().all(|m| is_media_file(&m.name)));
            let expected = files.iter().filter(|f| is_media_file(&f.name)).count();
            prop_assert_eq!(media.len(), expected);
        }
    }
}
