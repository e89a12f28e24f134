//! Character pose assignment

use crate::config::{CharacterDynamics, GenreDefaults, MoodConfig};
use crate::types::{AssignmentSource, CharacterAssignment, CharacterPose, MoodBlock};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Character drawn as the group pose
pub const GROUP_CHARACTER: &str = "together";

/// Folder substituted when a mood's pose folder has no art
const NEUTRAL_FOLDER: &str = "neutral";

/// Animation used for genre-default assignments
const GENRE_ANIMATION: &str = "gentle_breathe";

/// Dynamics used when the mood map has nothing for a character
fn neutral_dynamics(character: &str) -> CharacterDynamics {
    if character == GROUP_CHARACTER {
        CharacterDynamics::new("chill", GENRE_ANIMATION, 0.95)
    } else {
        CharacterDynamics::new(NEUTRAL_FOLDER, GENRE_ANIMATION, 1.0)
    }
}

/// First `.png` in a directory by file name
fn first_png(dir: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.to_lowercase().ends_with(".png"))
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Maps a resolved mood (or the genre defaults) to per-character poses
#[derive(Debug, Clone)]
pub struct CharacterAssigner<'a> {
    characters_dir: PathBuf,
    characters: &'a [String],
    moods: &'a MoodConfig,
    genres: &'a GenreDefaults,
}

impl<'a> CharacterAssigner<'a> {
    pub fn new(
        characters_dir: impl Into<PathBuf>,
        characters: &'a [String],
        moods: &'a MoodConfig,
        genres: &'a GenreDefaults,
    ) -> Self {
        Self {
            characters_dir: characters_dir.into(),
            characters,
            moods,
            genres,
        }
    }

    /// Assign poses for a song
    pub fn assign(&self, mood: &MoodBlock, genre: &str) -> CharacterAssignment {
        if mood.safety_valve_triggered {
            self.assign_from_genre(genre)
        } else {
            self.assign_from_mood(&mood.name)
        }
    }

    fn assign_from_genre(&self, genre: &str) -> CharacterAssignment {
        let entry = self.genres.entry(genre);
        debug!("Characters from genre defaults ({} -> {})", genre, entry.default_mood);

        let poses = self
            .characters
            .iter()
            .map(|character| {
                let relative = entry
                    .pose_for(character)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| self.neutral_pose(character));
                let scale = if character == GROUP_CHARACTER { 0.95 } else { 1.0 };
                (
                    character.clone(),
                    CharacterPose {
                        pose: Path::new(character).join(relative),
                        animation: GENRE_ANIMATION.to_string(),
                        scale,
                    },
                )
            })
            .collect();

        CharacterAssignment {
            source: AssignmentSource::GenreDefaults,
            mood_used: entry.default_mood.clone(),
            poses,
        }
    }

    fn assign_from_mood(&self, mood: &str) -> CharacterAssignment {
        let dynamics = self.moods.character_dynamics.get(mood);
        if dynamics.is_none() {
            warn!("No character dynamics for mood '{}', using neutral poses", mood);
        }

        let mut poses = BTreeMap::new();
        for character in self.characters {
            let dynamic = dynamics
                .and_then(|d| d.get(character))
                .cloned()
                .unwrap_or_else(|| neutral_dynamics(character));

            let folder = self.characters_dir.join(character).join(&dynamic.pose_folder);
            let pose = match first_png(&folder) {
                Some(file) => PathBuf::from(&dynamic.pose_folder).join(file),
                None => {
                    warn!(
                        "No pose art in {}, substituting {} pose",
                        folder.display(),
                        NEUTRAL_FOLDER
                    );
                    self.neutral_pose(character)
                }
            };

            poses.insert(
                character.clone(),
                CharacterPose {
                    pose: Path::new(character).join(pose),
                    animation: dynamic.animation,
                    scale: dynamic.scale,
                },
            );
        }

        CharacterAssignment {
            source: AssignmentSource::MoodMap,
            mood_used: mood.to_string(),
            poses,
        }
    }

    /// Neutral pose relative to the character's directory
    fn neutral_pose(&self, character: &str) -> PathBuf {
        let folder = self.characters_dir.join(character).join(NEUTRAL_FOLDER);
        let file = first_png(&folder).unwrap_or_else(|| format!("{}_0.png", character));
        PathBuf::from(NEUTRAL_FOLDER).join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"png").unwrap();
    }

    fn mood(name: &str, valve: bool) -> MoodBlock {
        MoodBlock {
            name: name.into(),
            rule: None,
            fallback_used: false,
            safety_valve_triggered: valve,
            safety_valve_reason: None,
        }
    }

    fn characters() -> Vec<String> {
        vec!["weeter".into(), "blubby".into(), "together".into()]
    }

    #[test]
    fn test_mood_poses_pick_first_png() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("weeter/happy/b.png"));
        touch(&dir.path().join("weeter/happy/a.png"));
        touch(&dir.path().join("weeter/happy/notes.txt"));

        let (moods, genres, chars) = (MoodConfig::default(), GenreDefaults::default(), characters());
        let assigner = CharacterAssigner::new(dir.path(), &chars, &moods, &genres);
        let assignment = assigner.assign(&mood("happy", false), "pop");

        assert_eq!(assignment.source, AssignmentSource::MoodMap);
        assert_eq!(assignment.poses["weeter"].pose, PathBuf::from("weeter/happy/a.png"));
        assert_eq!(assignment.poses["weeter"].animation, "bounce");
        assert_eq!(assignment.poses.len(), 3);
    }

    #[test]
    fn test_missing_folder_falls_back_to_neutral() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("blubby/neutral/blubby_idle.png"));

        let (moods, genres, chars) = (MoodConfig::default(), GenreDefaults::default(), characters());
        let assigner = CharacterAssigner::new(dir.path(), &chars, &moods, &genres);
        let assignment = assigner.assign(&mood("hype", false), "edm");

        assert_eq!(
            assignment.poses["blubby"].pose,
            PathBuf::from("blubby/neutral/blubby_idle.png")
        );
        // No art at all still yields a deterministic path for preflight to report
        assert_eq!(
            assignment.poses["weeter"].pose,
            PathBuf::from("weeter/neutral/weeter_0.png")
        );
    }

    #[test]
    fn test_valve_uses_genre_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{"genres": {"reggae": {"default_mood": "chill",
            "weeter_pose": "chill/weeter_2.png"}}}"#;
        let genres: GenreDefaults = serde_json::from_str(json).unwrap();
        let (moods, chars) = (MoodConfig::default(), characters());
        let assigner = CharacterAssigner::new(dir.path(), &chars, &moods, &genres);
        let assignment = assigner.assign(&mood("chill", true), "reggae");

        assert_eq!(assignment.source, AssignmentSource::GenreDefaults);
        assert_eq!(assignment.mood_used, "chill");
        assert_eq!(assignment.poses["weeter"].pose, PathBuf::from("weeter/chill/weeter_2.png"));
        assert_eq!(assignment.poses["together"].scale, 0.95);
        assert!(assignment.poses.values().all(|p| p.animation == "gentle_breathe"));
    }
}
