//! End-to-end engine tests against a stub CLI.
//!
//! Each test points the runner at a small shell script standing in for the
//! external process, so the full pipeline (queueing, mode selection,
//! rate-limit fallback, session persistence, logging, journaling) runs
//! for real against a temp directory.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{ModelConfig, SecurityLevel, Settings};
use crate::paths::Paths;
use crate::runner::Runner;
use crate::sessions::SessionStore;

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    runner: Arc<Runner>,
    sessions: Arc<SessionStore>,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let stub = root.join("stub.sh");

        let mut settings = Settings::default();
        settings.runner.command = stub.display().to_string();
        configure(&mut settings);
        let settings = Arc::new(settings);

        let paths = Paths::new(root.join(".valetd"));
        let sessions = Arc::new(SessionStore::new(paths.clone(), Arc::clone(&settings)));
        let runner = Arc::new(Runner::new(settings, paths, Arc::clone(&sessions)));

        let harness = Self {
            _dir: dir,
            root,
            runner,
            sessions,
        };
        harness.set_stub("echo unset-stub");
        harness
    }

    /// (Re)write the stub script. `{root}` in the body is replaced with the
    /// temp directory, so scripts can record into absolute paths.
    fn set_stub(&self, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let body = body.replace("{root}", &self.root.display().to_string());
        let stub = self.root.join("stub.sh");
        std::fs::write(&stub, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&stub).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&stub, perms).unwrap();
    }

    fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.file(name)).unwrap_or_default()
    }

    fn line_count(&self, name: &str) -> usize {
        self.read(name).lines().count()
    }
}

#[tokio::test]
async fn new_session_run_parses_output_and_persists_session() {
    let h = Harness::new(|_| {});
    h.set_stub("echo '{\"session_id\":\"sess-one\",\"result\":\"hello from stub\"}'");

    let result = h.runner.run("greet", "hi", None).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "hello from stub");
    assert!(result.stderr.is_empty());

    let session = h.sessions.peek("main").await.unwrap();
    assert_eq!(session.session_id, "sess-one");

    // Run log and journal were written.
    let logs: Vec<String> = std::fs::read_dir(h.file(".valetd/logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("greet-"));
    assert!(logs[0].ends_with(".log"));

    let journal: Vec<PathBuf> = std::fs::read_dir(h.file(".valetd/workspace/memory"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(journal.len(), 1);
    assert!(std::fs::read_to_string(&journal[0])
        .unwrap()
        .contains("hello from stub"));
}

#[tokio::test]
async fn second_run_resumes_with_the_issued_session_id() {
    let h = Harness::new(|_| {});
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         case \"$*\" in\n\
           *--resume*) echo 'resumed reply' ;;\n\
           *) echo '{\"session_id\":\"sess-two\",\"result\":\"created\"}' ;;\n\
         esac",
    );

    let first = h.runner.run("first", "hello", None).await.unwrap();
    assert_eq!(first.stdout, "created");
    assert_eq!(h.sessions.peek("main").await.unwrap().session_id, "sess-two");

    let second = h.runner.run("second", "again", None).await.unwrap();
    assert_eq!(second.stdout.trim(), "resumed reply");

    let args = h.read("args.log");
    let lines: Vec<&str> = args.lines().collect();
    // Exactly one new-mode (json) and one resume-mode (text) invocation,
    // resuming the id issued by the first.
    assert_eq!(lines.iter().filter(|l| **l == "json").count(), 1);
    assert_eq!(lines.iter().filter(|l| **l == "text").count(), 1);
    let resume_at = lines.iter().position(|l| *l == "--resume").unwrap();
    assert_eq!(lines[resume_at + 1], "sess-two");
}

#[tokio::test]
async fn rate_limit_swaps_to_fallback_and_keeps_only_its_output() {
    let h = Harness::new(|settings| {
        settings.models.primary = ModelConfig {
            model: "primary-model".into(),
            api: "key-a".into(),
        };
        settings.models.fallback = ModelConfig {
            model: "fallback-model".into(),
            api: "key-b".into(),
        };
    });
    h.set_stub(
        "echo run >> {root}/count.log\n\
         case \"$*\" in\n\
           *fallback-model*) echo 'fallback says hi' ;;\n\
           *) echo \"You've hit your limit. Come back tomorrow.\" ;;\n\
         esac",
    );

    let result = h.runner.run("limited", "do work", None).await.unwrap();
    assert_eq!(result.exit_code, 0);
    // The fallback's output replaces the primary's entirely. It is not valid
    // structured output, so the new session is NOT persisted and the next
    // run will attempt new-session mode again.
    assert_eq!(result.stdout.trim(), "fallback says hi");
    assert!(!result.stdout.contains("hit your limit"));
    assert_eq!(h.line_count("count.log"), 2);
    assert!(h.sessions.peek("main").await.is_none());
}

#[tokio::test]
async fn rate_limit_on_both_attempts_returns_the_message_verbatim() {
    let message = "You've hit your limit. Upgrade for more usage.";
    let h = Harness::new(|settings| {
        settings.models.primary = ModelConfig {
            model: "primary-model".into(),
            api: "key-a".into(),
        };
        settings.models.fallback = ModelConfig {
            model: "fallback-model".into(),
            api: "key-b".into(),
        };
    });
    h.set_stub(&format!(
        "echo run >> {{root}}/count.log\necho \"{}\"",
        message
    ));

    let result = h.runner.run("limited", "do work", None).await.unwrap();
    assert_eq!(result.stdout, message);
    assert_eq!(h.line_count("count.log"), 2);
}

#[tokio::test]
async fn rate_limit_without_fallback_is_not_retried() {
    let h = Harness::new(|_| {});
    h.set_stub("echo run >> {root}/count.log\necho \"You've hit your limit.\"");

    let result = h.runner.run("limited", "do work", None).await.unwrap();
    assert_eq!(result.stdout, "You've hit your limit.");
    assert_eq!(h.line_count("count.log"), 1);
}

#[tokio::test]
async fn identical_fallback_config_is_not_retried() {
    let h = Harness::new(|settings| {
        settings.models.primary = ModelConfig {
            model: "Same-Model".into(),
            api: "key".into(),
        };
        // Differs only by model-name case, which compares equal.
        settings.models.fallback = ModelConfig {
            model: "same-model".into(),
            api: "key".into(),
        };
    });
    h.set_stub("echo run >> {root}/count.log\necho \"You've hit your limit.\"");

    h.runner.run("limited", "do work", None).await.unwrap();
    assert_eq!(h.line_count("count.log"), 1);
}

#[tokio::test]
async fn spawn_failure_surfaces_through_run_result() {
    let h = Harness::new(|settings| {
        settings.runner.command = "/nonexistent/claude-binary".into();
    });

    let result = h.runner.run("broken", "hi", None).await.unwrap();
    assert_eq!(result.exit_code, 1);
    assert!(result.stdout.is_empty());
    assert!(result.stderr.contains("Failed to execute"));
}

#[tokio::test]
async fn non_zero_exit_does_not_create_a_session() {
    let h = Harness::new(|_| {});
    h.set_stub("echo 'partial output'\nexit 3");

    let result = h.runner.run("failing", "hi", None).await.unwrap();
    assert_eq!(result.exit_code, 3);
    assert!(h.sessions.peek("main").await.is_none());
}

#[tokio::test]
async fn bootstrap_runs_once_then_becomes_a_noop() {
    let h = Harness::new(|_| {});
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         echo run >> {root}/count.log\n\
         echo '{\"session_id\":\"boot-sess\",\"result\":\"awake\"}'",
    );

    h.runner.bootstrap(None).await.unwrap();
    assert_eq!(
        h.sessions.peek("main").await.unwrap().session_id,
        "boot-sess"
    );
    assert_eq!(h.line_count("count.log"), 1);
    assert!(h.read("args.log").contains("Wakeup, my friend!"));

    h.runner.bootstrap(None).await.unwrap();
    assert_eq!(h.line_count("count.log"), 1);
}

#[tokio::test]
async fn bootstrap_prefers_the_agent_boot_checklist() {
    let h = Harness::new(|_| {});
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         echo '{\"session_id\":\"boot-sess\",\"result\":\"awake\"}'",
    );

    let workspace = h.file(".valetd/workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("BOOTUP.md"), "Run the morning checklist.\n").unwrap();

    h.runner.bootstrap(None).await.unwrap();
    let args = h.read("args.log");
    assert!(args.contains("Run the morning checklist."));
    assert!(!args.contains("Wakeup, my friend!"));
}

#[tokio::test]
async fn glm_alias_routes_via_env_instead_of_model_flag() {
    let h = Harness::new(|settings| {
        settings.models.primary = ModelConfig {
            model: "glm".into(),
            api: "key-a".into(),
        };
    });
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         printf '{\"session_id\":\"s\",\"result\":\"%s\"}' \"$ANTHROPIC_BASE_URL\"",
    );

    let result = h.runner.run("glm-run", "hi", None).await.unwrap();
    assert_eq!(result.stdout, "https://api.z.ai/api/anthropic");
    assert!(!h.read("args.log").contains("--model"));
}

#[tokio::test]
async fn user_messages_carry_a_clock_prefix() {
    let h = Harness::new(|settings| {
        settings.timezone_offset_minutes = 60;
    });
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         echo '{\"session_id\":\"s\",\"result\":\"ok\"}'",
    );

    h.runner
        .run_user_message("send", "what day is it?", None)
        .await
        .unwrap();
    let args = h.read("args.log");
    assert!(args.contains("Current date and time:"));
    assert!(args.contains("what day is it?"));
}

#[tokio::test]
async fn concurrent_runs_never_overlap_and_keep_submission_order() {
    let h = Harness::new(|_| {});
    h.set_stub(
        "echo start >> {root}/events.log\n\
         sleep 0.1\n\
         echo end >> {root}/events.log\n\
         echo reply",
    );

    // Mixed agents on purpose: cross-agent runs serialize too.
    let a = h.runner.run("a", "one", None);
    let b = h.runner.run("b", "two", Some("research"));
    let c = h.runner.run("c", "three", None);
    let (ra, rb, rc) = tokio::join!(a, b, c);
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    let events: Vec<String> = h.read("events.log").lines().map(String::from).collect();
    assert_eq!(events, vec!["start", "end", "start", "end", "start", "end"]);
}

#[tokio::test]
async fn unrestricted_omits_the_directory_scope_prompt() {
    let h = Harness::new(|settings| {
        settings.security.level = SecurityLevel::Unrestricted;
    });
    h.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         echo '{\"session_id\":\"s\",\"result\":\"ok\"}'",
    );
    h.runner.run("open", "hi", None).await.unwrap();
    let args = h.read("args.log");
    assert!(args.contains("You are running inside valetd."));
    assert!(!args.contains("CRITICAL SECURITY CONSTRAINT"));

    let h2 = Harness::new(|_| {});
    h2.set_stub(
        "printf '%s\\n' \"$@\" >> {root}/args.log\n\
         echo '{\"session_id\":\"s\",\"result\":\"ok\"}'",
    );
    h2.runner.run("scoped", "hi", None).await.unwrap();
    assert!(h2.read("args.log").contains("CRITICAL SECURITY CONSTRAINT"));
}
