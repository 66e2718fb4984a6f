//! Source preparation policies applied before a program is launched.
//!
//! `Passthrough` writes the submitted code unchanged. `DenylistGuard` wraps it
//! in a launcher that compiles and runs it in a fresh namespace. That
//! namespace sees a copy of the builtins with a filtering `__import__` and
//! without `eval`, `exec` and `compile`. The interpreter's own `builtins`
//! module is not modified, so stdlib imports keep working.
//!
//! The guard is a denylist, not a sandbox. Known gaps:
//! - only imports issued by the user code are filtered; modules already
//!   loaded stay reachable through other references (`os.system`,
//!   `sys.modules`), and `import builtins` hands back the unfiltered module,
//! - filesystem access, CPU and memory are not restricted,
//! - tracebacks include one launcher frame above the user's `<module>`.

/// Modules blocked by default: networking, process spawning, unsafe deserialization.
pub const DEFAULT_BLOCKED_MODULES: &[&str] = &[
    "urllib", "urllib3", "requests", "http", "httpx", "socket", "ftplib", "telnetlib",
    "smtplib", "poplib", "imaplib", "subprocess", "pty", "commands", "pickle", "shelve",
    "marshal",
];

/// Name user code is compiled under when guarded; appears in tracebacks.
pub const USER_CODE_FILENAME: &str = "<user_code>";

/// Builtins hidden from guarded user code.
const REMOVED_BUILTINS: &[&str] = &["eval", "exec", "compile"];

/// How submitted code is rewritten before it is written to the session.
pub trait SourcePolicy: Send + Sync {
    /// Returns the program text that will actually be executed.
    fn prepare(&self, code: &str) -> String;

    /// Short name for logs and status output.
    fn name(&self) -> &str;
}

/// Runs the submitted code as-is.
pub struct Passthrough;

impl SourcePolicy for Passthrough {
    fn prepare(&self, code: &str) -> String {
        code.to_string()
    }

    fn name(&self) -> &str {
        "unrestricted"
    }
}

/// Runs user code in a namespace whose builtins lack `eval`/`exec`/`compile`
/// and whose `__import__` rejects the denylist.
///
/// The user code is embedded as a string literal and executed by the
/// preamble, so it never runs at module level with the real builtins.
pub struct DenylistGuard {
    blocked_modules: Vec<String>,
}

impl DenylistGuard {
    pub fn new<I, S>(blocked_modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut blocked_modules: Vec<String> =
            blocked_modules.into_iter().map(Into::into).collect();
        blocked_modules.sort();
        blocked_modules.dedup();
        Self { blocked_modules }
    }

    pub fn blocked_modules(&self) -> &[String] {
        &self.blocked_modules
    }

    fn program(&self, code: &str) -> String {
        let modules = self
            .blocked_modules
            .iter()
            .map(|m| python_string_literal(m))
            .collect::<Vec<_>>()
            .join(", ");
        let removed = REMOVED_BUILTINS
            .iter()
            .map(|b| python_string_literal(b))
            .collect::<Vec<_>>()
            .join(", ");

        // The real `builtins` module is left untouched: the import machinery
        // itself calls `exec` when loading source modules.
        let mut out = String::new();
        out.push_str("import builtins as _guard_builtins\n");
        out.push_str("import linecache as _guard_linecache\n\n");
        out.push_str(&format!("_GUARD_BLOCKED = frozenset([{modules}])\n"));
        out.push_str("_guard_original_import = _guard_builtins.__import__\n\n");
        out.push_str("def _guard_import(name, *args, **kwargs):\n");
        out.push_str("    if name in _GUARD_BLOCKED or name.split('.')[0] in _GUARD_BLOCKED:\n");
        out.push_str(
            "        raise ImportError(\"Import of '\" + name + \"' is blocked for security reasons\")\n",
        );
        out.push_str("    return _guard_original_import(name, *args, **kwargs)\n\n");
        out.push_str("_guard_user_builtins = dict(_guard_builtins.__dict__)\n");
        out.push_str("_guard_user_builtins['__import__'] = _guard_import\n");
        out.push_str(&format!("for _guard_name in ({removed},):\n"));
        out.push_str("    _guard_user_builtins.pop(_guard_name, None)\n\n");
        out.push_str(&format!("_guard_source = {}\n", python_string_literal(code)));
        // Tracebacks show the user's own lines, numbered from 1.
        out.push_str(&format!("_guard_filename = {}\n", python_string_literal(USER_CODE_FILENAME)));
        out.push_str("_guard_linecache.cache[_guard_filename] = (\n");
        out.push_str("    len(_guard_source), None, _guard_source.splitlines(True), _guard_filename\n");
        out.push_str(")\n");
        out.push_str("exec(\n");
        out.push_str("    compile(_guard_source, _guard_filename, 'exec'),\n");
        out.push_str("    {'__name__': '__main__', '__file__': __file__, '__builtins__': _guard_user_builtins},\n");
        out.push_str(")\n");
        out
    }
}

impl Default for DenylistGuard {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCKED_MODULES.iter().copied())
    }
}

impl SourcePolicy for DenylistGuard {
    fn prepare(&self, code: &str) -> String {
        self.program(code)
    }

    fn name(&self) -> &str {
        "restricted"
    }
}

/// Single-quoted Python literal. Quotes, backslashes and control characters
/// are escaped, so any source text survives on one line.
fn python_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_identity() {
        let code = "print('hello')";
        assert_eq!(Passthrough.prepare(code), code);
        assert_eq!(Passthrough.name(), "unrestricted");
    }

    #[test]
    fn test_guard_embeds_user_code_as_literal() {
        let code = "x = {'a': 1}\nprint(x)\n";
        let program = DenylistGuard::default().prepare(code);
        assert!(program.contains(&format!("_guard_source = {}\n", python_string_literal(code))));
        assert!(!program.lines().any(|line| line == "print(x)"));
    }

    #[test]
    fn test_guard_lists_every_blocked_module() {
        let program = DenylistGuard::default().prepare("");
        for module in DEFAULT_BLOCKED_MODULES {
            assert!(program.contains(&format!("'{module}'")), "missing {module}");
        }
    }

    #[test]
    fn test_guard_filters_a_copy_of_builtins() {
        let program = DenylistGuard::default().prepare("");
        assert!(program.contains("_guard_user_builtins = dict(_guard_builtins.__dict__)"));
        assert!(program.contains("_guard_user_builtins['__import__'] = _guard_import"));
        assert!(program.contains("('eval', 'exec', 'compile',)"));
        assert!(program.contains("'__builtins__': _guard_user_builtins"));
        assert!(program.contains("is blocked for security reasons"));
        // The interpreter-wide module must stay intact for the import machinery.
        assert!(!program.contains("delattr(_guard_builtins"));
        assert!(!program.contains("_guard_builtins.__import__ = "));
    }

    #[test]
    fn test_custom_denylist_is_sorted_and_deduplicated() {
        let guard = DenylistGuard::new(["socket", "ctypes", "socket"]);
        assert_eq!(guard.blocked_modules(), &["ctypes", "socket"]);
        let program = guard.prepare("");
        assert!(program.contains("frozenset(['ctypes', 'socket'])"));
        assert!(!program.contains("'pickle'"));
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(python_string_literal("a'b"), r"'a\'b'");
        assert_eq!(python_string_literal(r"a\b"), r"'a\\b'");
        assert_eq!(python_string_literal("a\nb\r\tc"), r"'a\nb\r\tc'");
        assert_eq!(python_string_literal("nul\0"), r"'nul\u0000'");
        assert_eq!(python_string_literal("\u{7f}"), r"'\u007f'");
        assert_eq!(python_string_literal("héllo ✓"), "'héllo ✓'");
    }

    #[test]
    fn test_literal_is_single_line() {
        let literal = python_string_literal("line 1\nline 2\r\n\"quoted\"\n");
        assert_eq!(literal.lines().count(), 1);
    }

    async fn run_guarded(code: &str) -> std::process::Output {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guarded.py");
        std::fs::write(&path, DenylistGuard::default().prepare(code)).unwrap();

        tokio::process::Command::new("python3")
            .arg(&path)
            .output()
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn test_guard_blocks_denylisted_import_under_python() {
        let output = run_guarded("import socket\n").await;
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Import of 'socket' is blocked for security reasons"));
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn test_guard_allows_stdlib_imports_under_python() {
        let code = "import json, csv, decimal\nprint(json.dumps({'ok': True}))\n";
        let output = run_guarded(code).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(output.status.success(), "stderr: {stderr}");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "{\"ok\": true}\n");
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn test_guard_hides_eval_under_python() {
        let output = run_guarded("print(eval('1 + 1'))\n").await;
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("NameError"));
        assert!(stderr.contains(USER_CODE_FILENAME));
    }

    #[tokio::test]
    #[ignore = "requires python3 on PATH"]
    async fn test_guard_runs_user_code_as_main_under_python() {
        let code = "from __future__ import annotations\n\
                    if __name__ == '__main__':\n    print('main')\n";
        let output = run_guarded(code).await;
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert_eq!(String::from_utf8_lossy(&output.stdout), "main\n");
    }
}
