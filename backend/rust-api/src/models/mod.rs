pub mod attendance;
pub mod events;
pub mod session;
pub mod stats;

pub use attendance::{
    ActivityLogEntry, AttendanceListResponse, AttendanceQuery, AttendanceRecord, AttendanceSort,
    AttendanceView, AttendanceWithStudent, AttentionState, EffectiveStatus, HandRaiseRequest,
    HeartbeatRequest, HeartbeatResponse, StatusCounts, StudentSummary, TransitionWrite,
};
pub use events::{AttendanceChange, ChangeKind, DashboardEvent, SessionEnded};
pub use session::{
    Group, JoinSessionRequest, JoinSessionResponse, LessonInfo, LessonResource, LiveSession,
    PreparedLesson, ScheduledClass, SessionContent, StartSessionRequest, Student,
};
pub use stats::{GroupStatsResponse, StudentStats, StudentStatsRow};
