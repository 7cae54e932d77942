use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

pub const DEFAULT_PASS_MARK: f64 = 50.0;
pub const SUBJECT_MAX_MARKS: f64 = 100.0;

/// Attendance rates at or above this are shown without the attention flag.
/// Distinct from the comment bands; the two are surfaced separately.
pub const ATTENTION_THRESHOLD: u32 = 75;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotState {
    NotEntered,
    Absent,
    Scored(f64),
}

impl SlotState {
    /// Not-entered slots count as 0 in arithmetic: a partially graded
    /// subject shows a lower interim score instead of disappearing.
    fn value_or_zero(self) -> f64 {
        match self {
            SlotState::Scored(v) => v,
            SlotState::NotEntered | SlotState::Absent => 0.0,
        }
    }

    fn entered(self) -> bool {
        !matches!(self, SlotState::NotEntered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalScore {
    Score(f64),
    Absent,
}

impl FinalScore {
    pub fn as_number(self) -> Option<f64> {
        match self {
            FinalScore::Score(v) => Some(v),
            FinalScore::Absent => None,
        }
    }
}

impl std::fmt::Display for FinalScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalScore::Score(v) => write!(f, "{:.1}", v),
            FinalScore::Absent => write!(f, "AB"),
        }
    }
}

// Wire shape: a JSON number, or the literal string "AB".
impl Serialize for FinalScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FinalScore::Score(v) => serializer.serialize_f64(*v),
            FinalScore::Absent => serializer.serialize_str("AB"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
    Ab,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
            Grade::Ab => "AB",
        }
    }
}

impl Serialize for Grade {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcMethod {
    AverageAll,
    EndOfTermOnly,
    WeightedAverage,
}

impl CalcMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "average_all" => Some(Self::AverageAll),
            "end_of_term_only" => Some(Self::EndOfTermOnly),
            "weighted_average" => Some(Self::WeightedAverage),
            _ => None,
        }
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::AverageAll => "average_all",
            Self::EndOfTermOnly => "end_of_term_only",
            Self::WeightedAverage => "weighted_average",
        }
    }
}

impl Serialize for CalcMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeConfig {
    pub method: CalcMethod,
    pub weight_qa1: f64,
    pub weight_qa2: f64,
    pub weight_end_of_term: f64,
    pub pass_mark: f64,
}

impl Default for GradeConfig {
    fn default() -> Self {
        Self {
            method: CalcMethod::AverageAll,
            weight_qa1: 0.0,
            weight_qa2: 0.0,
            weight_end_of_term: 0.0,
            pass_mark: DEFAULT_PASS_MARK,
        }
    }
}

impl Serialize for GradeConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("GradeConfig", 5)?;
        s.serialize_field("calculationMethod", self.method.as_key())?;
        s.serialize_field("weightQa1", &self.weight_qa1)?;
        s.serialize_field("weightQa2", &self.weight_qa2)?;
        s.serialize_field("weightEndOfTerm", &self.weight_end_of_term)?;
        s.serialize_field("passMark", &self.pass_mark)?;
        s.end()
    }
}

impl GradeConfig {
    /// Tolerant parse of a configuration payload. The upstream service uses
    /// snake_case keys, the portal wire shape camelCase; accept both.
    /// Missing or malformed values fall back to defaults, never to an error.
    pub fn from_json(raw: Option<&serde_json::Value>) -> Self {
        let Some(obj) = raw.and_then(|v| v.as_object()) else {
            return Self::default();
        };
        let field = |camel: &str, snake: &str| obj.get(camel).or_else(|| obj.get(snake));

        let method = field("calculationMethod", "calculation_method")
            .and_then(|v| v.as_str())
            .and_then(CalcMethod::parse)
            .unwrap_or(CalcMethod::AverageAll);
        let num = |camel: &str, snake: &str, fallback: f64| {
            field(camel, snake).and_then(|v| v.as_f64()).unwrap_or(fallback)
        };

        Self {
            method,
            weight_qa1: num("weightQa1", "weight_qa1", 0.0),
            weight_qa2: num("weightQa2", "weight_qa2", 0.0),
            weight_end_of_term: num("weightEndOfTerm", "weight_end_of_term", 0.0),
            pass_mark: num("passMark", "pass_mark", DEFAULT_PASS_MARK),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Qa1,
    Qa2,
    EndOfTerm,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectScores {
    pub name: String,
    #[serde(alias = "qa_1")]
    pub qa1: Option<f64>,
    #[serde(alias = "qa_2")]
    pub qa2: Option<f64>,
    #[serde(alias = "end_of_term", alias = "eot")]
    pub end_of_term: Option<f64>,
    #[serde(alias = "qa1_absent")]
    pub qa1_absent: bool,
    #[serde(alias = "qa2_absent")]
    pub qa2_absent: bool,
    #[serde(alias = "end_of_term_absent", alias = "eot_absent")]
    pub end_of_term_absent: bool,
    #[serde(alias = "final_score")]
    pub final_score: Option<f64>,
}

impl SubjectScores {
    /// The absent flag dominates any stray numeric value in the slot;
    /// a numeric 0 with no flag is a real score.
    pub fn slot(&self, slot: Slot) -> SlotState {
        let (value, absent) = match slot {
            Slot::Qa1 => (self.qa1, self.qa1_absent),
            Slot::Qa2 => (self.qa2, self.qa2_absent),
            Slot::EndOfTerm => (self.end_of_term, self.end_of_term_absent),
        };
        if absent {
            SlotState::Absent
        } else {
            match value {
                Some(v) => SlotState::Scored(v),
                None => SlotState::NotEntered,
            }
        }
    }

    /// An assessment counts as entered when it is scored or flagged absent.
    pub fn slot_entered(&self, slot: Slot) -> bool {
        self.slot(slot).entered()
    }

    pub fn any_entry(&self) -> bool {
        [Slot::Qa1, Slot::Qa2, Slot::EndOfTerm]
            .into_iter()
            .any(|s| self.slot_entered(s))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
}

fn average_all(subject: &SubjectScores) -> FinalScore {
    let mut sum = 0.0;
    for slot in [Slot::Qa1, Slot::Qa2, Slot::EndOfTerm] {
        match subject.slot(slot) {
            SlotState::Absent => return FinalScore::Absent,
            state => sum += state.value_or_zero(),
        }
    }
    FinalScore::Score(sum / 3.0)
}

pub fn resolve_final_score(subject: &SubjectScores, config: &GradeConfig) -> FinalScore {
    // A precomputed backend score wins unconditionally, absence flags included.
    if let Some(v) = subject.final_score {
        return FinalScore::Score(v);
    }

    match config.method {
        CalcMethod::EndOfTermOnly => match subject.slot(Slot::EndOfTerm) {
            SlotState::Absent => FinalScore::Absent,
            state => FinalScore::Score(state.value_or_zero()),
        },
        CalcMethod::AverageAll => average_all(subject),
        CalcMethod::WeightedAverage => {
            let weights = [
                (Slot::Qa1, config.weight_qa1),
                (Slot::Qa2, config.weight_qa2),
                (Slot::EndOfTerm, config.weight_end_of_term),
            ];
            let total: f64 = weights.iter().filter(|(_, w)| *w > 0.0).map(|(_, w)| w).sum();
            if total <= 0.0 {
                // All weights zero would divide by zero; fall back to the
                // simple average, absence rule included.
                return average_all(subject);
            }
            let mut sum = 0.0;
            for (slot, weight) in weights {
                if weight <= 0.0 {
                    continue;
                }
                match subject.slot(slot) {
                    SlotState::Absent => return FinalScore::Absent,
                    state => sum += state.value_or_zero() * weight,
                }
            }
            FinalScore::Score(sum / total)
        }
    }
}

pub fn grade_for(score: FinalScore, pass_mark: f64) -> Grade {
    let value = match score {
        FinalScore::Absent => return Grade::Ab,
        FinalScore::Score(v) => v,
    };
    if value >= 80.0 {
        Grade::A
    } else if value >= 70.0 {
        Grade::B
    } else if value >= 60.0 {
        Grade::C
    } else if value >= pass_mark {
        Grade::D
    } else {
        Grade::F
    }
}

pub fn subject_remark(grade: Grade) -> &'static str {
    match grade {
        Grade::Ab => "Absent",
        Grade::F => "Failed",
        _ => "Passed",
    }
}

/// The aggregate status uses uppercase variants; per-subject remarks do not.
/// The portal surfaces both verbatim.
pub fn overall_remark(grade: Grade) -> &'static str {
    match grade {
        Grade::Ab => "INCOMPLETE",
        Grade::F => "FAILED",
        _ => "PASSED",
    }
}

/// Gate before aggregation: a report with zero entered assessments anywhere
/// is not computable, and an end-of-term-only report needs at least one
/// end-of-term entry (absent-flagged slots count as entered).
pub fn report_available(subjects: &[SubjectScores], config: &GradeConfig) -> bool {
    if subjects.is_empty() {
        return false;
    }
    if config.method == CalcMethod::EndOfTermOnly {
        return subjects.iter().any(|s| s.slot_entered(Slot::EndOfTerm));
    }
    subjects.iter().any(|s| s.any_entry())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    pub name: String,
    pub final_score: FinalScore,
    pub grade: Grade,
    pub remark: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBands {
    pub strong: usize,
    pub middle: usize,
    pub below_pass: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub rate: u32,
    pub comment: &'static str,
    pub needs_attention: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub subjects: Vec<SubjectResult>,
    #[serde(serialize_with = "serialize_average")]
    pub average: Option<f64>,
    pub grand_total: f64,
    pub overall_grade: Grade,
    pub overall_remark: &'static str,
    pub strongest_subjects: Vec<String>,
    pub needs_improvement: Vec<String>,
    pub grade_bands: GradeBands,
    pub passed_count: usize,
    pub subject_count: usize,
}

// "N/A" is only ever used for averages; the grand total stays 0.0.
fn serialize_average<S: Serializer>(v: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(n) => serializer.serialize_f64(*n),
        None => serializer.serialize_str("N/A"),
    }
}

pub fn compute_report_card(
    subjects: &[SubjectScores],
    config: &GradeConfig,
    term_average: Option<f64>,
) -> ReportSummary {
    let results: Vec<SubjectResult> = subjects
        .iter()
        .map(|s| {
            let final_score = resolve_final_score(s, config);
            let grade = grade_for(final_score, config.pass_mark);
            SubjectResult {
                name: s.name.clone(),
                final_score,
                grade,
                remark: subject_remark(grade),
            }
        })
        .collect();

    let numeric: Vec<f64> = results
        .iter()
        .filter_map(|r| r.final_score.as_number())
        .collect();
    let grand_total: f64 = numeric.iter().sum();
    let computed_average = if numeric.is_empty() {
        None
    } else {
        Some(grand_total / numeric.len() as f64)
    };
    // A backend-supplied term average is authoritative over recomputation.
    let average = term_average.or(computed_average);

    let overall_grade = grade_for(
        match average {
            Some(v) => FinalScore::Score(v),
            None => FinalScore::Absent,
        },
        config.pass_mark,
    );

    let strongest_subjects = if numeric.is_empty() {
        Vec::new()
    } else {
        let best = numeric.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        results
            .iter()
            .filter(|r| r.final_score.as_number() == Some(best))
            .map(|r| r.name.clone())
            .collect()
    };

    let needs_improvement: Vec<String> = results
        .iter()
        .filter(|r| matches!(r.grade, Grade::D | Grade::F))
        .map(|r| r.name.clone())
        .collect();

    let grade_bands = GradeBands {
        strong: results
            .iter()
            .filter(|r| matches!(r.grade, Grade::A | Grade::B))
            .count(),
        middle: results
            .iter()
            .filter(|r| matches!(r.grade, Grade::C | Grade::D))
            .count(),
        below_pass: numeric.iter().filter(|v| **v < config.pass_mark).count(),
    };

    let passed_count = results
        .iter()
        .filter(|r| !matches!(r.grade, Grade::F | Grade::Ab))
        .count();

    ReportSummary {
        subject_count: results.len(),
        subjects: results,
        average,
        grand_total,
        overall_grade,
        overall_remark: overall_remark(overall_grade),
        strongest_subjects,
        needs_improvement,
        grade_bands,
        passed_count,
    }
}

pub fn attendance_rate(present: i64, absent: i64) -> u32 {
    let total = present + absent;
    if total <= 0 {
        return 0;
    }
    ((present as f64 / total as f64) * 100.0).round() as u32
}

pub fn attendance_comment(rate: u32) -> &'static str {
    if rate >= 95 {
        "excellent"
    } else if rate >= 80 {
        "good"
    } else {
        "needs improvement"
    }
}

pub fn attendance_summary(counts: &AttendanceCounts) -> AttendanceSummary {
    let rate = attendance_rate(counts.present, counts.absent);
    AttendanceSummary {
        present: counts.present,
        absent: counts.absent,
        late: counts.late,
        rate,
        comment: attendance_comment(rate),
        needs_attention: rate < ATTENTION_THRESHOLD,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    pub subject: String,
    pub total_marks: f64,
    pub marks_scored: FinalScore,
    pub grade: Grade,
    pub remark: &'static str,
}

/// Tabular handoff for the document exporter. The trailing synthetic row
/// counts one full paper per listed subject, valid scores or not.
pub fn export_rows(summary: &ReportSummary) -> Vec<ExportRow> {
    let mut rows: Vec<ExportRow> = summary
        .subjects
        .iter()
        .map(|r| ExportRow {
            subject: r.name.clone(),
            total_marks: SUBJECT_MAX_MARKS,
            marks_scored: r.final_score,
            grade: r.grade,
            remark: r.remark,
        })
        .collect();
    rows.push(ExportRow {
        subject: "GRAND TOTAL".to_string(),
        total_marks: summary.subject_count as f64 * SUBJECT_MAX_MARKS,
        marks_scored: FinalScore::Score(summary.grand_total),
        grade: summary.overall_grade,
        remark: overall_remark(summary.overall_grade),
    });
    rows
}
