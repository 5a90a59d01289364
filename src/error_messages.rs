/// Error Messages with Solutions
///
/// Turns backend failures into user-facing hints
use crate::OvcError;
use console::style;

pub trait ErrorWithSolution {
    fn with_solution(&self) -> String;
}

fn render(title: &str, details: &str, causes: &[&str], solutions: &[&str]) -> String {
    let mut out = format!(
        "{} {}\n\n{}\n{}",
        style("Error:").red().bold(),
        style(title).bold(),
        style("Details:").yellow(),
        details
    );
    if !causes.is_empty() {
        out.push_str(&format!("\n\n{}", style("Possible causes:").yellow()));
        for cause in causes {
            out.push_str(&format!("\n  • {cause}"));
        }
    }
    if !solutions.is_empty() {
        out.push_str(&format!("\n\n{}", style("Solutions:").green().bold()));
        for (i, solution) in solutions.iter().enumerate() {
            out.push_str(&format!(
                "\n  {} {}",
                style(format!("{}.", i + 1)).cyan().bold(),
                solution
            ));
        }
    }
    out
}

impl ErrorWithSolution for OvcError {
    fn with_solution(&self) -> String {
        let details = self.to_string();
        match self {
            OvcError::BackendUnavailable(_) => render(
                "AMD GPU interface not available",
                &details,
                &["amdgpu kernel driver not loaded", "sysfs not mounted"],
                &[
                    "Check the driver is bound: lspci -k | grep -A3 VGA",
                    "Load it: sudo modprobe amdgpu",
                    "Point AMDOVC_DRM_ROOT at the DRM class directory",
                ],
            ),
            OvcError::Backend(_) => render(
                "Overdrive operation failed",
                &details,
                &[
                    "Overdrive disabled in the driver",
                    "Adapter does not expose pp_od_clk_voltage",
                ],
                &[
                    "Boot with amdgpu.ppfeaturemask=0xffffffff",
                    "Run amdovc -v to inspect the adapter",
                ],
            ),
            OvcError::PermissionDenied(_) => render(
                "Permission denied",
                &details,
                &["Writing Overdrive settings requires root"],
                &["Run with sudo"],
            ),
            OvcError::AdapterOutOfRange(_) => render(
                "Adapter out of range",
                &details,
                &[],
                &["List adapters with: amdovc -a all"],
            ),
            OvcError::Config(_) => render(
                "Configuration error",
                &details,
                &["Invalid configuration or baseline file"],
                &["Check ~/.config/amdovc/config.toml"],
            ),
            OvcError::InvalidParameters(_) | OvcError::ValidationFailed(_) | OvcError::Io(_) => {
                format!("{} {}", style("Error:").red().bold(), details)
            }
        }
    }
}

/// Print error with solution
pub fn print_error_with_solution(error: &OvcError) {
    eprintln!("\n{}\n", error.with_solution());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_hint() {
        let text = OvcError::PermissionDenied("/sys/class/drm/card0/device/pp_od_clk_voltage".into())
            .with_solution();
        let text = console::strip_ansi_codes(&text);
        assert!(text.contains("Permission denied"));
        assert!(text.contains("1. Run with sudo"));
    }

    #[test]
    fn test_print_backend_hint() {
        let error = OvcError::BackendUnavailable("Cannot read /sys/class/drm".into());
        assert!(console::strip_ansi_codes(&error.with_solution()).contains("sudo modprobe amdgpu"));
        print_error_with_solution(&error);
    }

    #[test]
    fn test_plain_errors_have_no_solutions() {
        let text = OvcError::ValidationFailed(2).with_solution();
        assert!(!console::strip_ansi_codes(&text).contains("Solutions:"));
    }
}
