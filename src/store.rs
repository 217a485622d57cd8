//! Lesson store: where generated schedules are committed and read back.

use crate::data::{GroupId, Lesson, TeacherId, WeekType, is_valid_day};
use crate::error::StoreError;
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;

pub trait LessonStore: Send + Sync {
    fn lessons(&self, semester: u8, academic_year: &str) -> Result<Vec<Lesson>, StoreError>;

    /// Replaces every lesson of (semester, academic_year) with `lessons`.
    /// Either all of them are stored or none.
    fn replace(
        &self,
        semester: u8,
        academic_year: &str,
        lessons: Vec<Lesson>,
    ) -> Result<(), StoreError>;
}

/// Filter for schedule views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Owner {
    #[default]
    Anyone,
    Group(GroupId),
    Teacher(TeacherId),
}

#[derive(Debug, Clone, Default)]
pub struct LessonQuery {
    pub owner: Owner,
    pub day_of_week: Option<u8>,
    pub week_type: Option<WeekType>,
}

impl LessonQuery {
    pub fn matches(&self, lesson: &Lesson) -> bool {
        let owner = match self.owner {
            Owner::Anyone => true,
            Owner::Group(id) => lesson.group_id == id,
            Owner::Teacher(id) => lesson.teacher_id == id,
        };
        owner
            && self.day_of_week.is_none_or(|day| lesson.day_of_week == day)
            && self
                .week_type
                .is_none_or(|week_type| lesson.week_type.overlaps(week_type))
    }
}

/// Lessons of (semester, academic_year) selected by `filter`, ordered by day,
/// slot and week type.
pub fn query(
    store: &dyn LessonStore,
    semester: u8,
    academic_year: &str,
    filter: &LessonQuery,
) -> Result<Vec<Lesson>, StoreError> {
    let mut lessons: Vec<Lesson> = store
        .lessons(semester, academic_year)?
        .into_iter()
        .filter(|lesson| filter.matches(lesson))
        .collect();
    lessons.sort_by_key(|lesson| (lesson.cell(), lesson.course_load_id, lesson.occurrence));
    Ok(lessons)
}

#[derive(Debug, Default)]
pub struct InMemoryLessonStore {
    lessons: RwLock<HashMap<(u8, String), Vec<Lesson>>>,
}

impl InMemoryLessonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LessonStore for InMemoryLessonStore {
    fn lessons(&self, semester: u8, academic_year: &str) -> Result<Vec<Lesson>, StoreError> {
        Ok(self
            .lessons
            .read()
            .get(&(semester, academic_year.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn replace(
        &self,
        semester: u8,
        academic_year: &str,
        lessons: Vec<Lesson>,
    ) -> Result<(), StoreError> {
        if let Some(lesson) = lessons.iter().find(|l| !is_valid_day(l.day_of_week)) {
            return Err(StoreError::InvalidDay {
                discipline_name: lesson.discipline_name.clone(),
                day_of_week: lesson.day_of_week,
            });
        }
        info!(
            "committing {} lessons for semester {semester} of {academic_year}",
            lessons.len()
        );
        self.lessons
            .write()
            .insert((semester, academic_year.to_string()), lessons);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(load: u32, group: u32, day: u8, slot: u8, week_type: WeekType) -> Lesson {
        Lesson {
            course_load_id: load,
            occurrence: 0,
            discipline_name: format!("Discipline {load}"),
            lesson_type: "Лекция".to_string(),
            teacher_id: 1,
            teacher_name: "Ivanova A.".to_string(),
            group_id: group,
            group_name: format!("G-{group}"),
            classroom_id: Some(1),
            classroom_name: Some("R-1".to_string()),
            building_name: Some("Main".to_string()),
            day_of_week: day,
            time_slot: slot,
            week_type,
            semester: 1,
            academic_year: "2025/2026".to_string(),
        }
    }

    #[test]
    fn replace_swaps_the_whole_pair() {
        let store = InMemoryLessonStore::new();
        store
            .replace(1, "2025/2026", vec![lesson(1, 1, 1, 1, WeekType::Both)])
            .unwrap();
        store
            .replace(2, "2025/2026", vec![lesson(9, 1, 1, 1, WeekType::Both)])
            .unwrap();
        store
            .replace(1, "2025/2026", vec![lesson(2, 1, 2, 2, WeekType::Odd)])
            .unwrap();

        let stored = store.lessons(1, "2025/2026").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].course_load_id, 2);
        assert_eq!(store.lessons(2, "2025/2026").unwrap().len(), 1);
        assert!(store.lessons(1, "2024/2025").unwrap().is_empty());
    }

    #[test]
    fn sunday_lessons_are_refused_and_nothing_is_written() {
        let store = InMemoryLessonStore::new();
        store
            .replace(1, "2025/2026", vec![lesson(1, 1, 1, 1, WeekType::Both)])
            .unwrap();
        let result = store.replace(
            1,
            "2025/2026",
            vec![lesson(2, 1, 2, 1, WeekType::Both), lesson(3, 1, 0, 1, WeekType::Both)],
        );
        assert!(matches!(result, Err(StoreError::InvalidDay { day_of_week: 0, .. })));
        assert_eq!(store.lessons(1, "2025/2026").unwrap()[0].course_load_id, 1);
    }

    #[test]
    fn query_filters_and_orders() {
        let store = InMemoryLessonStore::new();
        store
            .replace(
                1,
                "2025/2026",
                vec![
                    lesson(1, 1, 3, 1, WeekType::Both),
                    lesson(2, 2, 1, 1, WeekType::Both),
                    lesson(3, 1, 1, 2, WeekType::Odd),
                    lesson(4, 1, 1, 2, WeekType::Even),
                ],
            )
            .unwrap();

        let group = LessonQuery {
            owner: Owner::Group(1),
            ..LessonQuery::default()
        };
        let ids: Vec<u32> = query(&store, 1, "2025/2026", &group)
            .unwrap()
            .iter()
            .map(|l| l.course_load_id)
            .collect();
        assert_eq!(ids, vec![3, 4, 1]);

        let odd_monday = LessonQuery {
            owner: Owner::Group(1),
            day_of_week: Some(1),
            week_type: Some(WeekType::Odd),
        };
        let ids: Vec<u32> = query(&store, 1, "2025/2026", &odd_monday)
            .unwrap()
            .iter()
            .map(|l| l.course_load_id)
            .collect();
        assert_eq!(ids, vec![3]);
    }
}
