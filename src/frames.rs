//! Java stack-frame lines inside thread content.
//!
//! Frames look like `at java.base/java.lang.Thread.run(Thread.java:1583)` on
//! modular JDKs and `at java.lang.Thread.run(Thread.java:619)` on older ones.
//! Application classes loaded by the app class loader may carry an `app//`
//! prefix instead of a module name.

use serde::Serialize;

/// One parsed `at ...` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JavaFrame {
    /// Fully qualified method, module prefix removed
    pub method: String,
    /// Module or loader prefix (`java.base`, `app`), when present
    pub module: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub is_native: bool,
}

impl JavaFrame {
    pub fn is_jdk(&self) -> bool {
        is_jdk_class(&self.method)
    }

    /// The frame text as it followed `at ` in the dump.
    pub fn location(&self) -> String {
        let mut text = String::new();
        if let Some(module) = &self.module {
            text.push_str(module);
            text.push('/');
        }
        text.push_str(&self.method);
        match (&self.file, self.line) {
            _ if self.is_native => text.push_str("(Native Method)"),
            (Some(file), Some(line)) => text.push_str(&format!("({file}:{line})")),
            (Some(file), None) => text.push_str(&format!("({file})")),
            (None, _) => text.push_str("(Unknown Source)"),
        }
        text
    }
}

/// Parse a single stack line; `None` for anything that is not an `at` frame.
pub fn parse_frame_line(line: &str) -> Option<JavaFrame> {
    let content = line.trim().strip_prefix("at ")?.trim();

    let (target, location) = match (content.find('('), content.rfind(')')) {
        (Some(open), Some(close)) if close > open => (&content[..open], Some(&content[open + 1..close])),
        _ => (content, None),
    };

    let (mut module, method) = split_module(target);
    // JDK 9-11 put the module inside the parentheses: `(java.base@11.0.2/Native Method)`.
    let location = location.map(|location| match location.split_once('/') {
        Some((prefix, rest)) if !prefix.contains(' ') => {
            module = module.or_else(|| prefix.split('@').next().filter(|m| !m.is_empty()));
            rest
        }
        _ => location,
    });
    let mut frame = JavaFrame {
        method: method.to_string(),
        module: module.map(str::to_string),
        file: None,
        line: None,
        is_native: false,
    };

    match location {
        Some("Native Method") => frame.is_native = true,
        Some("Unknown Source") | None => {}
        Some(location) => match location.rfind(':') {
            Some(colon) => {
                frame.file = Some(location[..colon].to_string());
                frame.line = location[colon + 1..].parse().ok();
            }
            None => frame.file = Some(location.to_string()),
        },
    }

    Some(frame)
}

/// `java.base/java.lang.Object.wait` -> (`java.base`, `java.lang.Object.wait`).
/// Also handles the `java.base@21/...` versioned form and `app//`.
fn split_module(target: &str) -> (Option<&str>, &str) {
    // Hidden lambda classes look like `Foo$$Lambda/0x0000000801001234.run`.
    match target.find('/').filter(|&slash| !target[..slash].contains('$')) {
        Some(slash) => {
            let module = target[..slash].split('@').next().unwrap_or_default();
            let method = target[slash + 1..].trim_start_matches('/');
            (Some(module).filter(|m| !m.is_empty()), method)
        }
        None => (None, target),
    }
}

/// Classes shipped with the JDK. Carrier threads parked in these are not
/// considered stuck in application code.
pub fn is_jdk_class(method: &str) -> bool {
    method.starts_with("java.")
        || method.starts_with("javax.")
        || method.starts_with("jdk.")
        || method.starts_with("sun.")
        || method.starts_with("com.sun.")
}

/// All frames of a thread's content, in order.
pub fn frames(content: &str) -> impl Iterator<Item = JavaFrame> + '_ {
    content.lines().filter_map(parse_frame_line)
}

/// First frame appearing after the line containing `marker`.
pub fn first_frame_after(content: &str, marker: &str) -> Option<JavaFrame> {
    content
        .lines()
        .skip_while(|line| !line.contains(marker))
        .skip(1)
        .find_map(parse_frame_line)
}

/// Text after `at ` of the first `Native Method` frame, verbatim.
pub fn first_native_frame(content: &str) -> Option<String> {
    content
        .lines()
        .filter(|line| parse_frame_line(line).is_some_and(|frame| frame.is_native))
        .find_map(|line| line.trim().strip_prefix("at "))
        .map(|text| text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modular_frame() {
        let frame = parse_frame_line("\tat java.base/java.lang.Thread.run(Thread.java:1583)").unwrap();
        assert_eq!(frame.method, "java.lang.Thread.run");
        assert_eq!(frame.module.as_deref(), Some("java.base"));
        assert_eq!(frame.file.as_deref(), Some("Thread.java"));
        assert_eq!(frame.line, Some(1583));
        assert!(frame.is_jdk());
    }

    #[test]
    fn test_classic_frame() {
        let frame = parse_frame_line("        at com.example.Worker.loop(Worker.java:42)").unwrap();
        assert_eq!(frame.module, None);
        assert_eq!(frame.method, "com.example.Worker.loop");
        assert!(!frame.is_jdk());
    }

    #[test]
    fn test_native_frame() {
        let frame = parse_frame_line("\tat java.base/java.lang.ref.Reference.waitForReferencePendingList(Native Method)").unwrap();
        assert!(frame.is_native);
        assert_eq!(
            frame.location(),
            "java.base/java.lang.ref.Reference.waitForReferencePendingList(Native Method)"
        );
    }

    #[test]
    fn test_app_loader_prefix() {
        let frame = parse_frame_line("\tat app//com.example.Busy.spin(Busy.java:10)").unwrap();
        assert_eq!(frame.module.as_deref(), Some("app"));
        assert_eq!(frame.method, "com.example.Busy.spin");
    }

    #[test]
    fn test_versioned_module() {
        let frame = parse_frame_line("at java.base@21.0.2/java.lang.Object.wait0(Native Method)").unwrap();
        assert_eq!(frame.module.as_deref(), Some("java.base"));
        assert_eq!(frame.method, "java.lang.Object.wait0");
    }

    #[test]
    fn test_module_inside_location() {
        let frame = parse_frame_line("\tat java.lang.Thread.sleep(java.base@11.0.2/Native Method)").unwrap();
        assert!(frame.is_native);
        assert_eq!(frame.module.as_deref(), Some("java.base"));

        let frame = parse_frame_line("\tat java.lang.ref.ReferenceQueue.remove(java.base@11.0.2/ReferenceQueue.java:155)").unwrap();
        assert_eq!(frame.file.as_deref(), Some("ReferenceQueue.java"));
        assert_eq!(frame.line, Some(155));
    }

    #[test]
    fn test_non_frame_lines() {
        assert!(parse_frame_line("   java.lang.Thread.State: RUNNABLE").is_none());
        assert!(parse_frame_line("\t- locked <0x000000076ab62208> (a java.lang.Object)").is_none());
    }

    #[test]
    fn test_first_frame_after_marker() {
        let content = "\"ForkJoinPool-1-worker-1\" #22 daemon prio=5 runnable\n   java.lang.Thread.State: RUNNABLE\n   Carrying virtual thread #21\n\tat com.example.Busy.spin(Busy.java:10)\n\tat java.base/jdk.internal.vm.Continuation.run(Continuation.java:248)\n";
        let frame = first_frame_after(content, "Carrying virtual thread").unwrap();
        assert_eq!(frame.method, "com.example.Busy.spin");
        assert!(first_frame_after(content, "no such marker").is_none());
    }

    #[test]
    fn test_first_native_frame() {
        let content = "\"main\"\n\tat java.base/sun.nio.ch.Net.accept(Native Method)\n\tat java.base/sun.nio.ch.NioSocketImpl.accept(NioSocketImpl.java:748)\n";
        assert_eq!(
            first_native_frame(content).as_deref(),
            Some("java.base/sun.nio.ch.Net.accept(Native Method)")
        );
        assert_eq!(first_native_frame("\"idle\"\n"), None);
    }

    #[test]
    fn test_jdk_classification() {
        assert!(is_jdk_class("com.sun.net.httpserver.HttpServer.start"));
        assert!(is_jdk_class("javax.management.remote.Foo.bar"));
        assert!(!is_jdk_class("com.sunrise.App.main"));
        assert!(!is_jdk_class("org.example.App.main"));
    }
}
