use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::operations::content::Question;
use crate::response::AppError;
use crate::types::QuestionKind;

const TRUE_FALSE_OPTIONS: [&str; 2] = ["true", "false"];

/// Upper bound for a single question's weight.
pub const MAX_QUESTION_POINTS: i32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GradingError {
    #[error("answer references unknown question '{0}'")]
    UnknownQuestion(String),
    #[error("{0}")]
    InvalidQuestion(String),
}

impl From<GradingError> for AppError {
    fn from(err: GradingError) -> Self {
        AppError::validation(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: String,
    pub correct: bool,
    pub points_awarded: i32,
    pub points_possible: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub score: i64,
    pub max_score: i64,
    pub percentage: f64,
    pub passed: bool,
    pub results: Vec<QuestionResult>,
}

/// Question as served to someone who may not see the key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<String>,
    pub points: i32,
    pub position: i32,
}

impl From<Question> for PublicQuestion {
    fn from(question: Question) -> Self {
        Self {
            id: question.id,
            prompt: question.prompt,
            kind: question.kind,
            options: question.options,
            points: question.points,
            position: question.position,
        }
    }
}

pub fn grade(
    questions: &[Question],
    answers: &HashMap<String, Vec<String>>,
    pass_score: i32,
) -> Result<GradeReport, GradingError> {
    if let Some(unknown) = answers
        .keys()
        .find(|id| !questions.iter().any(|q| &q.id == *id))
    {
        return Err(GradingError::UnknownQuestion(unknown.clone()));
    }

    let mut score: i64 = 0;
    let mut max_score: i64 = 0;
    let mut results = Vec::with_capacity(questions.len());

    for question in questions {
        let given = answers.get(&question.id).map(Vec::as_slice).unwrap_or(&[]);
        let correct = is_correct(question, given);
        let awarded = if correct { question.points } else { 0 };
        score += i64::from(awarded);
        max_score += i64::from(question.points);
        results.push(QuestionResult {
            question_id: question.id.clone(),
            correct,
            points_awarded: awarded,
            points_possible: question.points,
        });
    }

    let percentage = percentage(score, max_score);
    Ok(GradeReport {
        score,
        max_score,
        percentage,
        passed: percentage >= f64::from(pass_score),
        results,
    })
}

pub fn percentage(score: i64, max_score: i64) -> f64 {
    if max_score <= 0 {
        return 0.0;
    }
    let raw = score as f64 * 100.0 / max_score as f64;
    (raw * 100.0).round() / 100.0
}

fn is_correct(question: &Question, given: &[String]) -> bool {
    if given.is_empty() {
        return false;
    }
    match question.kind {
        QuestionKind::SingleChoice | QuestionKind::TrueFalse => {
            let normalize = |value: &str| match question.kind {
                QuestionKind::TrueFalse => value.trim().to_ascii_lowercase(),
                _ => value.trim().to_string(),
            };
            given.len() == 1
                && question
                    .correct_answers
                    .first()
                    .is_some_and(|expected| normalize(expected) == normalize(&given[0]))
        }
        QuestionKind::MultipleChoice => {
            let expected: BTreeSet<&str> = question.correct_answers.iter().map(|a| a.trim()).collect();
            let actual: BTreeSet<&str> = given.iter().map(|a| a.trim()).collect();
            expected == actual
        }
        QuestionKind::ShortAnswer => {
            let answer = normalize_free_text(&given[0]);
            given.len() == 1
                && question
                    .correct_answers
                    .iter()
                    .any(|accepted| normalize_free_text(accepted) == answer)
        }
    }
}

fn normalize_free_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Checks a question definition and returns the options/answers to store.
pub fn normalize_question(
    kind: QuestionKind,
    options: Vec<String>,
    correct_answers: Vec<String>,
) -> Result<(Vec<String>, Vec<String>), GradingError> {
    let invalid = |msg: &str| GradingError::InvalidQuestion(msg.to_string());

    let correct: Vec<String> = correct_answers
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if correct.is_empty() {
        return Err(invalid("correctAnswers must not be empty"));
    }

    match kind {
        QuestionKind::TrueFalse => {
            let answer = correct[0].to_ascii_lowercase();
            if correct.len() != 1 || !TRUE_FALSE_OPTIONS.contains(&answer.as_str()) {
                return Err(invalid("TRUE_FALSE questions need exactly one answer: true or false"));
            }
            Ok((TRUE_FALSE_OPTIONS.iter().map(|o| o.to_string()).collect(), vec![answer]))
        }
        QuestionKind::SingleChoice | QuestionKind::MultipleChoice => {
            let options: Vec<String> = options
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
            if options.len() < 2 {
                return Err(invalid("choice questions need at least two options"));
            }
            let unique: BTreeSet<&String> = options.iter().collect();
            if unique.len() != options.len() {
                return Err(invalid("options must be distinct"));
            }
            if kind == QuestionKind::SingleChoice && correct.len() != 1 {
                return Err(invalid("SINGLE_CHOICE questions need exactly one correct answer"));
            }
            if correct.iter().any(|a| !options.contains(a)) {
                return Err(invalid("every correct answer must be one of the options"));
            }
            Ok((options, correct))
        }
        QuestionKind::ShortAnswer => Ok((Vec::new(), correct)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: &str, kind: QuestionKind, options: &[&str], correct: &[&str], points: i32) -> Question {
        Question {
            id: id.to_string(),
            test_id: "t1".to_string(),
            prompt: format!("prompt {id}"),
            kind,
            options: options.iter().map(|s| s.to_string()).collect(),
            correct_answers: correct.iter().map(|s| s.to_string()).collect(),
            points,
            position: 0,
        }
    }

    fn answers(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(id, values)| (id.to_string(), values.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    fn sample() -> Vec<Question> {
        vec![
            question("q1", QuestionKind::SingleChoice, &["a", "b", "c"], &["b"], 2),
            question("q2", QuestionKind::MultipleChoice, &["a", "b", "c"], &["a", "c"], 3),
            question("q3", QuestionKind::TrueFalse, &["true", "false"], &["true"], 1),
            question("q4", QuestionKind::ShortAnswer, &[], &["Borrow Checker", "borrowck"], 4),
        ]
    }

    #[test]
    fn all_correct_scores_full_marks() {
        let report = grade(
            &sample(),
            &answers(&[
                ("q1", &["b"]),
                ("q2", &["c", "a", "a"]),
                ("q3", &["TRUE"]),
                ("q4", &["  borrow   CHECKER "]),
            ]),
            60,
        )
        .unwrap();
        assert_eq!(report.score, 10);
        assert_eq!(report.max_score, 10);
        assert_eq!(report.percentage, 100.0);
        assert!(report.passed);
    }

    #[test]
    fn multiple_choice_is_all_or_nothing() {
        let report = grade(&sample(), &answers(&[("q2", &["a"])]), 60).unwrap();
        assert_eq!(report.score, 0);
        assert!(!report.results[1].correct);
    }

    #[test]
    fn unanswered_questions_score_zero_and_percentage_rounds() {
        let report = grade(&sample(), &answers(&[("q1", &["b"]), ("q3", &["true"])]), 30).unwrap();
        assert_eq!(report.score, 3);
        assert_eq!(report.percentage, 30.0);
        assert!(report.passed);

        let questions = vec![question("q1", QuestionKind::SingleChoice, &["a", "b"], &["a"], 1),
            question("q2", QuestionKind::SingleChoice, &["a", "b"], &["a"], 1),
            question("q3", QuestionKind::SingleChoice, &["a", "b"], &["a"], 1)];
        let report = grade(&questions, &answers(&[("q1", &["a"])]), 50).unwrap();
        assert_eq!(report.percentage, 33.33);
        assert!(!report.passed);
    }

    #[test]
    fn unknown_question_is_rejected() {
        let err = grade(&sample(), &answers(&[("nope", &["x"])]), 60).unwrap_err();
        assert_eq!(err, GradingError::UnknownQuestion("nope".into()));
    }

    #[test]
    fn empty_test_has_zero_percentage() {
        let report = grade(&[], &HashMap::new(), 0).unwrap();
        assert_eq!(report.percentage, 0.0);
        assert!(report.passed);
    }

    #[test]
    fn totals_do_not_overflow_on_heavy_questions() {
        let questions = vec![
            question("q1", QuestionKind::TrueFalse, &["true", "false"], &["true"], i32::MAX),
            question("q2", QuestionKind::TrueFalse, &["true", "false"], &["false"], i32::MAX),
        ];
        let report = grade(&questions, &answers(&[("q1", &["true"])]), 50).unwrap();
        assert_eq!(report.score, i64::from(i32::MAX));
        assert_eq!(report.max_score, 2 * i64::from(i32::MAX));
        assert_eq!(report.percentage, 50.0);
        assert!(report.passed);
    }

    #[test]
    fn question_definitions_are_validated() {
        let owned = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();

        assert!(normalize_question(QuestionKind::SingleChoice, owned(&["a"]), owned(&["a"])).is_err());
        assert!(normalize_question(QuestionKind::SingleChoice, owned(&["a", "b"]), owned(&["a", "b"])).is_err());
        assert!(normalize_question(QuestionKind::MultipleChoice, owned(&["a", "b"]), owned(&["c"])).is_err());
        assert!(normalize_question(QuestionKind::ShortAnswer, vec![], vec![]).is_err());

        let (options, correct) =
            normalize_question(QuestionKind::TrueFalse, vec![], owned(&["False"])).unwrap();
        assert_eq!(options, owned(&["true", "false"]));
        assert_eq!(correct, owned(&["false"]));
    }

    #[test]
    fn public_question_hides_key() {
        let value = serde_json::to_value(PublicQuestion::from(sample().remove(0))).unwrap();
        assert!(value.get("correctAnswers").is_none());
        assert_eq!(value["options"], serde_json::json!(["a", "b", "c"]));
    }
}
