/// Round-readiness detection.
pub mod gate;
/// Seeker assignment data model.
pub mod seeker;
