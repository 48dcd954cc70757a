use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
};

use crate::errors::ContentError;
use crate::learning::LearningPath;
use crate::models::{Content, Course, Department, Game, QuizProfile, QuizQuestion, Tailored};

pub const TAILORED_COURSE_ID: &str = "tailored-course";

/// Static content, validated once and shared read-only afterwards.
#[derive(Clone, Debug)]
pub struct Catalog {
    profiles: BTreeMap<String, QuizProfile>,
    courses: BTreeMap<String, Course>,
    departments: Vec<Department>,
    tailored: Option<Tailored>,
    games: BTreeMap<String, Game>,
}

impl Catalog {
    pub fn new(content: Content) -> Result<Catalog, ContentError> {
        for (name, profile) in &content.profile {
            if profile.pass_threshold > 100 {
                return Err(ContentError::BadThreshold(name.clone()));
            }
        }

        let mut courses = BTreeMap::new();
        for course in content.course {
            if course.id == TAILORED_COURSE_ID || courses.contains_key(&course.id) {
                return Err(ContentError::DuplicateCourse(course.id));
            }
            check_profile(&content.profile, &course.id, &course.profile)?;
            check_questions(&course.id, &course.quiz)?;
            courses.insert(course.id.clone(), course);
        }

        for department in &content.department {
            for course in &department.courses {
                if !courses.contains_key(course) {
                    return Err(ContentError::UnknownCourse {
                        owner: department.name.clone(),
                        course: course.clone(),
                    });
                }
            }
        }

        if let Some(tailored) = &content.tailored {
            check_profile(&content.profile, TAILORED_COURSE_ID, &tailored.profile)?;
            check_questions(TAILORED_COURSE_ID, &tailored.quiz)?;
            for course in &tailored.modules {
                if !courses.contains_key(course) {
                    return Err(ContentError::UnknownCourse {
                        owner: TAILORED_COURSE_ID.into(),
                        course: course.clone(),
                    });
                }
            }
        }

        let mut games = BTreeMap::new();
        for game in content.game {
            if game.rounds.is_empty() {
                return Err(ContentError::EmptyGame(game.id));
            }
            for (index, round) in game.rounds.iter().enumerate() {
                let correct = round.options.iter().filter(|option| option.correct).count();
                if !(2..=3).contains(&round.options.len()) || correct != 1 {
                    return Err(ContentError::BadRound {
                        game: game.id.clone(),
                        index,
                    });
                }
            }
            games.insert(game.id.clone(), game);
        }

        Ok(Catalog {
            profiles: content.profile,
            courses,
            departments: content.department,
            tailored: content.tailored,
            games,
        })
    }

    pub fn profile(&self, name: &str) -> Option<&QuizProfile> {
        self.profiles.get(name)
    }

    /// Looks up a course. The tailored course only exists for a session
    /// that picked a role.
    pub fn course(&self, id: &str, role: Option<&str>) -> Option<Cow<'_, Course>> {
        if id != TAILORED_COURSE_ID {
            return self.courses.get(id).map(Cow::Borrowed);
        }

        let tailored = self.tailored.as_ref()?;
        let role = role?;

        Some(Cow::Owned(Course {
            id: TAILORED_COURSE_ID.into(),
            title: tailored.title.replace("{role}", role),
            description: tailored.description.replace("{role}", role),
            role: Some(role.into()),
            badge: tailored.badge.clone(),
            profile: tailored.profile.clone(),
            cards: tailored.cards.clone(),
            quiz: tailored.quiz.clone(),
        }))
    }

    pub fn courses(&self) -> impl Iterator<Item = &Course> {
        self.courses.values()
    }

    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    pub fn department(&self, name: &str) -> Option<&Department> {
        self.departments.iter().find(|department| department.name == name)
    }

    pub fn has_tailored(&self) -> bool {
        self.tailored.is_some()
    }

    /// Course ids offered on a learning path, in display order.
    pub fn modules(&self, path: &LearningPath, role: Option<&str>) -> Vec<&str> {
        match path {
            LearningPath::Department(name) => self
                .department(name)
                .map(|department| department.courses.iter().map(|id| id.as_str()).collect())
                .unwrap_or_default(),
            LearningPath::Tailored => match &self.tailored {
                None => Vec::new(),
                Some(tailored) => role
                    .map(|_role| TAILORED_COURSE_ID)
                    .into_iter()
                    .chain(tailored.modules.iter().map(|id| id.as_str()))
                    .collect(),
            },
        }
    }

    pub fn game(&self, id: &str) -> Option<&Game> {
        self.games.get(id)
    }

    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }
}

fn check_profile(
    profiles: &BTreeMap<String, QuizProfile>,
    course: &str,
    profile: &str,
) -> Result<(), ContentError> {
    if profiles.contains_key(profile) {
        Ok(())
    } else {
        Err(ContentError::UnknownProfile {
            course: course.into(),
            profile: profile.into(),
        })
    }
}

fn check_questions(course: &str, questions: &[QuizQuestion]) -> Result<(), ContentError> {
    for (index, question) in questions.iter().enumerate() {
        if question.options.is_empty() {
            return Err(ContentError::NoOptions {
                course: course.into(),
                index,
            });
        }

        let unique = question.options.iter().collect::<BTreeSet<_>>();
        if unique.len() != question.options.len() {
            return Err(ContentError::DuplicateOption {
                course: course.into(),
                index,
            });
        }

        if !unique.contains(&question.answer) {
            return Err(ContentError::AnswerNotAnOption {
                course: course.into(),
                index,
            });
        }
    }

    Ok(())
}
