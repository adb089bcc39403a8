//! Writing turn assets (narration and illustrations) to the output directory.

use fabula_core::{ConversationTurn, ImageRef};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

/// Something a turn produced that the user can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedAsset {
    Audio(PathBuf),
    Image(PathBuf),
    ImageUrl(String),
}

impl std::fmt::Display for SavedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SavedAsset::Audio(path) => write!(f, "narration: {}", path.display()),
            SavedAsset::Image(path) => write!(f, "illustration: {}", path.display()),
            SavedAsset::ImageUrl(url) => write!(f, "illustration: {}", url),
        }
    }
}

/// Writes each turn's assets once, however many updates mention them.
pub struct AssetWriter {
    out_dir: PathBuf,
    written: HashSet<(String, &'static str)>,
}

impl AssetWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            written: HashSet::new(),
        }
    }

    /// Write any assets of `turn` not written before.
    ///
    /// Each asset is attempted independently. One that fails to write is
    /// retried on the next call.
    pub fn write_new(&mut self, turn: &ConversationTurn) -> Vec<io::Result<SavedAsset>> {
        let mut results = Vec::new();
        let id = turn.id.as_str();

        if let Some(audio) = &turn.audio {
            let key = (id.to_string(), "audio");
            if !self.written.contains(&key) {
                let path = self.out_dir.join(format!("{}.wav", id));
                let result = write_file(&path, &audio.wav).map(|()| SavedAsset::Audio(path));
                if result.is_ok() {
                    self.written.insert(key);
                }
                results.push(result);
            }
        }

        if let Some(illustration) = &turn.illustration {
            let key = (id.to_string(), "image");
            if !self.written.contains(&key) {
                let result = self.write_image(id, &illustration.image);
                if result.is_ok() {
                    self.written.insert(key);
                }
                results.push(result);
            }
        }

        results
    }

    /// Write an image under `stem`, or pass a remote URL through.
    pub fn write_image(&self, stem: &str, image: &ImageRef) -> io::Result<SavedAsset> {
        match image {
            ImageRef::Inline { data, .. } => {
                let ext = image.extension().unwrap_or("png");
                let path = self.out_dir.join(format!("{}.{}", stem, ext));
                write_file(&path, data)?;
                Ok(SavedAsset::Image(path))
            }
            ImageRef::Remote { url } => Ok(SavedAsset::ImageUrl(url.clone())),
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabula_core::{
        AudioAsset, Illustration, IllustrationSource, MockImageStrategy, PcmAudio, TurnPatch,
        WavFormat,
    };
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn finished_turn(image: ImageRef) -> ConversationTurn {
        let mut turn = ConversationTurn::narrator("A bear baked bread.");
        turn.apply(TurnPatch::Audio(Some(AudioAsset::from_pcm(&PcmAudio::new(
            vec![0, 0, 1, 0],
            WavFormat::default(),
        )))));
        turn.apply(TurnPatch::Illustration(Illustration {
            image,
            source: IllustrationSource::Generated {
                strategy: "mock".into(),
            },
        }));
        turn
    }

    #[test]
    fn test_writes_audio_and_inline_image_once() {
        let dir = TempDir::new().unwrap();
        let mut writer = AssetWriter::new(dir.path().join("out"));
        let turn = finished_turn(MockImageStrategy::sample_image());

        let saved: Vec<SavedAsset> = writer
            .write_new(&turn)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        let wav_path = dir.path().join("out").join(format!("{}.wav", turn.id));
        let png_path = dir.path().join("out").join(format!("{}.png", turn.id));
        assert_eq!(
            saved,
            vec![
                SavedAsset::Audio(wav_path.clone()),
                SavedAsset::Image(png_path.clone())
            ]
        );
        assert_eq!(std::fs::read(&wav_path).unwrap().len(), 48);
        assert!(png_path.exists());

        assert!(writer.write_new(&turn).is_empty());
    }

    #[test]
    fn test_remote_image_is_reported_not_written() {
        let dir = TempDir::new().unwrap();
        let mut writer = AssetWriter::new(dir.path());
        let turn = finished_turn(ImageRef::Remote {
            url: "https://picsum.photos/800/600?random=5".into(),
        });

        let saved: Vec<SavedAsset> = writer
            .write_new(&turn)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            saved[1],
            SavedAsset::ImageUrl("https://picsum.photos/800/600?random=5".into())
        );
        assert_eq!(
            saved[1].to_string(),
            "illustration: https://picsum.photos/800/600?random=5"
        );
    }

    #[test]
    fn test_pending_turn_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut writer = AssetWriter::new(dir.path());
        let turn = ConversationTurn::narrator("Still thinking...");
        assert!(writer.write_new(&turn).is_empty());
    }

    #[test]
    fn test_failed_write_is_retried() {
        let dir = TempDir::new().unwrap();
        // A regular file where the output directory should be.
        let out = dir.path().join("out");
        std::fs::write(&out, "x").unwrap();
        let mut writer = AssetWriter::new(&out);
        let turn = finished_turn(MockImageStrategy::sample_image());

        let first = writer.write_new(&turn);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.is_err()));

        std::fs::remove_file(&out).unwrap();
        let second = writer.write_new(&turn);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|r| r.is_ok()));
        assert!(out.join(format!("{}.wav", turn.id)).exists());

        assert!(writer.write_new(&turn).is_empty());
    }
}
