//! Fixed-layout row formatting, matching the classic top line:
//!
//! ```text
//!   PID USERNAME  PRI NICE  SIZE   RES STATE    WAIT      TIME    CPU COMMAND
//! ```

use std::collections::HashMap;
use std::ffi::CStr;

use crate::filter::ViewOptions;
use crate::record::ProcessRecord;

pub const HEADER: &str =
    "  PID USERNAME  PRI NICE  SIZE   RES STATE    WAIT      TIME    CPU COMMAND";

/// Maximum command column width; overflow is truncated, never wrapped.
const MAX_CMD: usize = 50;

/// uid → name lookup. Resolution failures fall back to the numeric uid.
pub trait UserResolver {
    fn name(&mut self, uid: u32) -> String;
}

/// Resolver backed by the system password database, with a per-session cache.
#[derive(Default)]
pub struct PasswdResolver {
    cache: HashMap<u32, String>,
}

impl UserResolver for PasswdResolver {
    fn name(&mut self, uid: u32) -> String {
        self.cache
            .entry(uid)
            .or_insert_with(|| passwd_name(uid).unwrap_or_else(|| uid.to_string()))
            .clone()
    }
}

// getpwuid_r is the reentrant lookup; grow the buffer on ERANGE.
fn passwd_name(uid: u32) -> Option<String> {
    let mut buf_size = 1024usize;
    loop {
        let mut buf = vec![0u8; buf_size];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf_size,
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf_size < 65536 {
            buf_size *= 2;
            continue;
        }
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            return None;
        }
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        return Some(name.to_string_lossy().into_owned());
    }
}

/// Reverse lookup for the `u` prompt: username to uid.
pub fn uid_for_name(name: &str) -> Option<u32> {
    let cname = std::ffi::CString::new(name).ok()?;
    let mut buf_size = 1024usize;
    loop {
        let mut buf = vec![0u8; buf_size];
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf_size,
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf_size < 65536 {
            buf_size *= 2;
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        return Some(pwd.pw_uid);
    }
}

/// Scale a KB quantity: plain below 1024, otherwise divide and suffix.
pub fn scale_k(kb: u64) -> String {
    if kb < 1024 {
        kb.to_string()
    } else if kb < 1024 * 1024 {
        format!("{}M", (kb + 512) / 1024)
    } else {
        format!("{}G", (kb + 512 * 1024) / (1024 * 1024))
    }
}

/// MM:SS, switching to HH:MM:SS once past sixty minutes.
pub fn format_time(seconds: u64) -> String {
    if seconds < 3600 {
        format!("{}:{:02}", seconds / 60, seconds % 60)
    } else {
        format!(
            "{}:{:02}:{:02}",
            seconds / 3600,
            (seconds % 3600) / 60,
            seconds % 60
        )
    }
}

/// Replace control characters with a visible placeholder.
pub fn printable(s: &str) -> String {
    s.chars().map(|c| if c.is_control() { '?' } else { c }).collect()
}

pub fn format_row(
    record: &ProcessRecord,
    opts: &ViewOptions,
    users: &mut dyn UserResolver,
) -> String {
    // Idle reclassification wins over the raw state abbreviation.
    let state = if record.is_idle(opts.idle_threshold) {
        "idle"
    } else {
        record.state.abbrev()
    };
    let wait = if record.wait_channel.is_empty() {
        "-"
    } else {
        record.wait_channel.as_str()
    };
    let command = printable(record.cmdline.as_deref().unwrap_or(&record.command));
    format!(
        "{:>5} {:<8.8} {:>3} {:>4} {:>5} {:>5} {:<8.8} {:<7.7} {:>6} {:>5.2}% {:.cmd$}",
        record.pid,
        users.name(record.uid),
        record.priority,
        record.nice,
        scale_k(record.vsize_kb),
        scale_k(record.rss_kb),
        state,
        wait,
        format_time(record.cpu_seconds),
        record.utilization * 100.0,
        command,
        cmd = MAX_CMD,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ProcState;

    struct FakeUsers;

    impl UserResolver for FakeUsers {
        fn name(&mut self, uid: u32) -> String {
            match uid {
                70 => "postgres".into(),
                other => other.to_string(),
            }
        }
    }

    fn record() -> ProcessRecord {
        ProcessRecord {
            pid: 4242,
            uid: 70,
            priority: 10,
            nice: 0,
            vsize_kb: 2048,
            rss_kb: 512,
            state: ProcState::Run,
            wait_channel: String::new(),
            cpu_seconds: 75,
            utilization: 0.1234,
            command: "postgres".into(),
            cmdline: Some("postgres: writer".into()),
            query: None,
            sleep_seconds: 0,
            is_system: false,
            is_thread: false,
        }
    }

    #[test]
    fn scale_k_switches_units_at_1024() {
        assert_eq!(scale_k(0), "0");
        assert_eq!(scale_k(1023), "1023");
        assert_eq!(scale_k(1024), "1M");
        assert_eq!(scale_k(1536), "2M");
        assert_eq!(scale_k(10 * 1024 * 1024), "10G");
    }

    #[test]
    fn time_gains_hours_past_sixty_minutes() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(75), "1:15");
        assert_eq!(format_time(3599), "59:59");
        assert_eq!(format_time(3600), "1:00:00");
        assert_eq!(format_time(3661), "1:01:01");
    }

    #[test]
    fn control_characters_become_placeholders() {
        assert_eq!(printable("psql\x1b[1m -c"), "psql?[1m -c");
        assert_eq!(printable("plain"), "plain");
    }

    #[test]
    fn row_has_expected_fields() {
        let opts = ViewOptions::default();
        let line = format_row(&record(), &opts, &mut FakeUsers);
        assert!(line.starts_with(" 4242 postgres"));
        assert!(line.contains(" 2M "));
        assert!(line.contains(" run "));
        assert!(line.contains(" 1:15 "));
        assert!(line.contains("12.34%"));
        assert!(line.ends_with("postgres: writer"));
    }

    #[test]
    fn idle_label_overrides_state_abbreviation() {
        let mut r = record();
        r.state = ProcState::Sleep;
        r.sleep_seconds = 120;
        r.utilization = 0.0;
        let opts = ViewOptions::default();
        let line = format_row(&r, &opts, &mut FakeUsers);
        assert!(line.contains(" idle "));
        assert!(!line.contains("sleep"));
    }

    #[test]
    fn missing_wait_channel_prints_dash() {
        let opts = ViewOptions::default();
        let line = format_row(&record(), &opts, &mut FakeUsers);
        assert!(line.contains(" -  "));
    }

    #[test]
    fn username_lookup_resolves_and_rejects() {
        assert_eq!(uid_for_name("root"), Some(0));
        assert_eq!(uid_for_name("no-such-user-xyz"), None);
    }

    #[test]
    fn unresolvable_uid_prints_numerically() {
        let mut r = record();
        r.uid = 12345;
        let opts = ViewOptions::default();
        let line = format_row(&r, &opts, &mut FakeUsers);
        assert!(line.contains("12345"));
    }

    #[test]
    fn overlong_command_is_truncated() {
        let mut r = record();
        r.cmdline = Some("x".repeat(200));
        let opts = ViewOptions::default();
        let line = format_row(&r, &opts, &mut FakeUsers);
        assert!(line.len() < 120);
    }
}
