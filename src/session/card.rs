//! The photos and grades of the card being labeled.

use super::SessionError;
use crate::capture::CaptureStep;
use crate::dataset::{CardRecord, CaptureIdGenerator, Grade, SequenceCounter, StagingPaths};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Slot {
    photo: Option<PathBuf>,
    grade: Option<Grade>,
}

/// Labeling state of one card. Both sides share a base id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CardSession {
    base_id: Option<String>,
    front: Slot,
    back: Slot,
}

impl CardSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_id(&self) -> Option<&str> {
        self.base_id.as_deref()
    }

    /// Returns the card's base id, drawing a new one on first use.
    pub fn ensure_base_id<C: SequenceCounter>(
        &mut self,
        ids: &mut CaptureIdGenerator<C>,
    ) -> Result<&str, SessionError> {
        if self.base_id.is_none() {
            self.base_id = Some(ids.next_base_id()?);
        }
        Ok(self.base_id.as_deref().unwrap_or_default())
    }

    /// Destination for the still of `step`.
    pub fn photo_path<C: SequenceCounter>(
        &mut self,
        step: CaptureStep,
        ids: &mut CaptureIdGenerator<C>,
        staging: &StagingPaths,
    ) -> Result<PathBuf, SessionError> {
        let base = self.ensure_base_id(ids)?.to_string();
        Ok(staging.image_file(&base, step.side())?)
    }

    fn slot(&self, step: CaptureStep) -> &Slot {
        match step {
            CaptureStep::Front => &self.front,
            CaptureStep::Back => &self.back,
        }
    }

    fn slot_mut(&mut self, step: CaptureStep) -> &mut Slot {
        match step {
            CaptureStep::Front => &mut self.front,
            CaptureStep::Back => &mut self.back,
        }
    }

    pub fn photo(&self, step: CaptureStep) -> Option<&Path> {
        self.slot(step).photo.as_deref()
    }

    pub fn grade(&self, step: CaptureStep) -> Option<Grade> {
        self.slot(step).grade
    }

    /// Stores an accepted photo, returning the one it replaces.
    pub fn set_photo(&mut self, step: CaptureStep, path: PathBuf) -> Option<PathBuf> {
        let slot = self.slot_mut(step);
        slot.grade = None;
        slot.photo.replace(path)
    }

    /// Grades the accepted photo of `step`.
    pub fn set_grade(&mut self, step: CaptureStep, grade: Grade) -> Result<(), SessionError> {
        let slot = self.slot_mut(step);
        if slot.photo.is_none() {
            return Err(SessionError::MissingPhoto(step));
        }
        slot.grade = Some(grade);
        Ok(())
    }

    /// Withdraws the grade of `step`, keeping its photo.
    pub fn clear_grade(&mut self, step: CaptureStep) -> Option<Grade> {
        self.slot_mut(step).grade.take()
    }

    /// The step still waiting for a grade, if a photo is pending one.
    pub fn awaiting_grade(&self) -> Option<CaptureStep> {
        [CaptureStep::Front, CaptureStep::Back]
            .into_iter()
            .find(|&step| self.photo(step).is_some() && self.grade(step).is_none())
    }

    /// Both sides photographed and graded.
    pub fn is_complete(&self) -> bool {
        [&self.front, &self.back]
            .iter()
            .all(|s| s.photo.is_some() && s.grade.is_some())
    }

    /// Builds the finished record; the final grade is the worse side.
    pub fn finalize(&self, device: &str, created_at_ms: i64) -> Result<CardRecord, SessionError> {
        let base_id = self.base_id.clone().ok_or(SessionError::NoBaseId)?;
        let (front_path, front_grade) = self.side(CaptureStep::Front)?;
        let (back_path, back_grade) = self.side(CaptureStep::Back)?;
        Ok(CardRecord {
            base_id,
            device: device.to_string(),
            front_path,
            back_path,
            front_grade,
            back_grade,
            final_grade: front_grade.worst(back_grade),
            created_at_ms,
        })
    }

    fn side(&self, step: CaptureStep) -> Result<(PathBuf, Grade), SessionError> {
        let slot = self.slot(step);
        let photo = slot.photo.clone().ok_or(SessionError::MissingPhoto(step))?;
        let grade = slot.grade.ok_or(SessionError::MissingGrade(step))?;
        Ok((photo, grade))
    }

    /// Forgets everything and returns the photo files that were held.
    pub fn clear(&mut self) -> Vec<PathBuf> {
        let taken = std::mem::take(self);
        [taken.front.photo, taken.back.photo]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::MemoryCounter;

    fn ids() -> CaptureIdGenerator<MemoryCounter> {
        CaptureIdGenerator::new("dev", MemoryCounter::default())
    }

    #[test]
    fn test_sides_share_base_id() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingPaths::new(dir.path());
        let mut ids = ids();
        let mut card = CardSession::new();

        let front = card.photo_path(CaptureStep::Front, &mut ids, &staging).unwrap();
        let back = card.photo_path(CaptureStep::Back, &mut ids, &staging).unwrap();
        let base = card.base_id().unwrap().to_string();
        assert!(base.ends_with("_dev_000001"));
        assert!(front.ends_with(format!("{base}_front.jpg")));
        assert!(back.ends_with(format!("{base}_back.jpg")));
    }

    #[test]
    fn test_finalize_takes_worst_grade() {
        let mut ids = ids();
        let mut card = CardSession::new();
        card.ensure_base_id(&mut ids).unwrap();
        card.set_photo(CaptureStep::Front, "f.jpg".into());
        card.set_grade(CaptureStep::Front, Grade::SlightlyPlayed).unwrap();
        assert_eq!(card.awaiting_grade(), None);

        assert!(matches!(
            card.finalize("dev", 0),
            Err(SessionError::MissingPhoto(CaptureStep::Back))
        ));

        card.set_photo(CaptureStep::Back, "b.jpg".into());
        assert_eq!(card.awaiting_grade(), Some(CaptureStep::Back));
        assert!(matches!(
            card.finalize("dev", 0),
            Err(SessionError::MissingGrade(CaptureStep::Back))
        ));

        card.set_grade(CaptureStep::Back, Grade::HeavilyPlayed).unwrap();
        assert!(card.is_complete());
        let record = card.finalize("dev", 42).unwrap();
        assert_eq!(record.final_grade, Grade::HeavilyPlayed);
        assert_eq!(record.front_grade, Grade::SlightlyPlayed);
        assert_eq!(record.created_at_ms, 42);
    }

    #[test]
    fn test_cleared_grade_awaits_again() {
        let mut card = CardSession::new();
        card.set_photo(CaptureStep::Front, "f.jpg".into());
        card.set_grade(CaptureStep::Front, Grade::NearMint).unwrap();
        card.set_photo(CaptureStep::Back, "b.jpg".into());
        card.set_grade(CaptureStep::Back, Grade::Damaged).unwrap();

        assert_eq!(card.clear_grade(CaptureStep::Back), Some(Grade::Damaged));
        assert_eq!(card.awaiting_grade(), Some(CaptureStep::Back));
        assert_eq!(card.photo(CaptureStep::Back), Some(Path::new("b.jpg")));
        assert_eq!(card.clear_grade(CaptureStep::Back), None);
    }

    #[test]
    fn test_grade_without_photo() {
        let mut card = CardSession::new();
        assert!(matches!(
            card.set_grade(CaptureStep::Front, Grade::NearMint),
            Err(SessionError::MissingPhoto(CaptureStep::Front))
        ));
    }

    #[test]
    fn test_retake_clears_grade_and_clear_returns_files() {
        let mut card = CardSession::new();
        card.set_photo(CaptureStep::Front, "f1.jpg".into());
        card.set_grade(CaptureStep::Front, Grade::NearMint).unwrap();
        let old = card.set_photo(CaptureStep::Front, "f2.jpg".into());
        assert_eq!(old, Some(PathBuf::from("f1.jpg")));
        assert_eq!(card.grade(CaptureStep::Front), None);

        card.set_photo(CaptureStep::Back, "b.jpg".into());
        let files = card.clear();
        assert_eq!(files, vec![PathBuf::from("f2.jpg"), PathBuf::from("b.jpg")]);
        assert_eq!(card, CardSession::new());
    }
}
