//! Role policy evaluated before any handler runs.
//!
//! The source of truth for who may call what lives in one table here instead
//! of per-handler role checks. Roles are strictly ordered: student < teacher
//! < moderator. Student-accessible read methods additionally require that the
//! `studentId` parameter matches the session user (a student only sees their
//! own records).

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Student,
    Teacher,
    Moderator,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "moderator" => Some(Role::Moderator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Moderator => "moderator",
        }
    }
}

/// Authenticated caller context, installed by `session.open` and passed to
/// every policy decision. Replaces any notion of ambient global auth state.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
}

enum Access {
    /// No session required (bootstrap and session management).
    Public,
    /// Session with at least the given role.
    Min(Role),
    /// Teacher or above, or a student reading their own records
    /// (`params.studentId` must equal the session user id).
    TeacherOrSelf,
}

fn access_for(method: &str) -> Access {
    match method {
        "health" | "workspace.select" | "session.open" | "session.close" => Access::Public,

        "semesters.list" | "sections.list" | "sections.get" | "sections.schedule.list"
        | "normatives.list" => Access::Min(Role::Student),

        "users.list"
        | "enrollments.enroll"
        | "enrollments.disenroll"
        | "enrollments.update"
        | "enrollments.listBySection"
        | "enrollments.refreshGrade"
        | "attendance.record"
        | "attendance.recordBulk"
        | "attendance.update"
        | "attendance.delete"
        | "normatives.create"
        | "normatives.update"
        | "normatives.delete"
        | "normatives.recordResult"
        | "normatives.deleteResult"
        | "payments.record"
        | "stats.section"
        | "stats.semester" => Access::Min(Role::Teacher),

        "enrollments.listByStudent" | "attendance.list" | "normatives.listResults"
        | "payments.list" | "stats.student" => Access::TeacherOrSelf,

        // Everything else (user/section/semester mutation, backup, unknown
        // methods) is moderator-only.
        _ => Access::Min(Role::Moderator),
    }
}

pub struct PolicyError {
    pub code: &'static str,
    pub message: String,
}

pub fn check(
    session: Option<&Session>,
    method: &str,
    params: &serde_json::Value,
) -> Result<(), PolicyError> {
    let access = access_for(method);
    if matches!(access, Access::Public) {
        return Ok(());
    }

    let Some(session) = session else {
        return Err(PolicyError {
            code: "no_session",
            message: format!("{} requires an open session", method),
        });
    };

    match access {
        Access::Public => Ok(()),
        Access::Min(min) => {
            if session.role >= min {
                Ok(())
            } else {
                Err(PolicyError {
                    code: "forbidden",
                    message: format!("{} requires role {} or above", method, min.as_str()),
                })
            }
        }
        Access::TeacherOrSelf => {
            if session.role >= Role::Teacher {
                return Ok(());
            }
            let target = params.get("studentId").and_then(|v| v.as_str());
            if target == Some(session.user_id.as_str()) {
                Ok(())
            } else {
                Err(PolicyError {
                    code: "forbidden",
                    message: format!("{} is limited to the student's own records", method),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(role: Role) -> Session {
        Session {
            user_id: "u1".to_string(),
            role,
        }
    }

    #[test]
    fn roles_order_student_teacher_moderator() {
        assert!(Role::Student < Role::Teacher);
        assert!(Role::Teacher < Role::Moderator);
        assert_eq!(Role::parse("teacher"), Some(Role::Teacher));
        assert_eq!(Role::parse("admin"), None);
    }

    #[test]
    fn no_session_blocks_everything_but_public() {
        assert!(check(None, "health", &json!({})).is_ok());
        assert!(check(None, "workspace.select", &json!({})).is_ok());
        let e = check(None, "sections.list", &json!({})).unwrap_err();
        assert_eq!(e.code, "no_session");
    }

    #[test]
    fn student_cannot_mutate_or_read_section_stats() {
        let s = session(Role::Student);
        assert_eq!(
            check(Some(&s), "sections.create", &json!({})).unwrap_err().code,
            "forbidden"
        );
        assert_eq!(
            check(Some(&s), "stats.section", &json!({"sectionId": "x"}))
                .unwrap_err()
                .code,
            "forbidden"
        );
        assert!(check(Some(&s), "sections.list", &json!({})).is_ok());
    }

    #[test]
    fn student_owns_only_their_records() {
        let s = session(Role::Student);
        assert!(check(Some(&s), "stats.student", &json!({"studentId": "u1"})).is_ok());
        assert_eq!(
            check(Some(&s), "stats.student", &json!({"studentId": "u2"}))
                .unwrap_err()
                .code,
            "forbidden"
        );
        assert_eq!(
            check(Some(&s), "attendance.list", &json!({})).unwrap_err().code,
            "forbidden"
        );
    }

    #[test]
    fn teacher_reads_any_student_but_cannot_manage_sections() {
        let t = session(Role::Teacher);
        assert!(check(Some(&t), "stats.student", &json!({"studentId": "u2"})).is_ok());
        assert!(check(Some(&t), "attendance.recordBulk", &json!({})).is_ok());
        assert_eq!(
            check(Some(&t), "sections.delete", &json!({})).unwrap_err().code,
            "forbidden"
        );
    }

    #[test]
    fn moderator_passes_everything() {
        let m = session(Role::Moderator);
        assert!(check(Some(&m), "users.create", &json!({})).is_ok());
        assert!(check(Some(&m), "backup.export", &json!({})).is_ok());
    }
}
