use crate::model::{Project, Severity, Status, StatusReport, Vulnerability};
use crate::publisher::StatusEvent;
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct ProjectRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Project")]
    name: String,
    #[tabled(rename = "Manifests")]
    manifests: usize,
    #[tabled(rename = "Packages")]
    packages: usize,
    #[tabled(rename = "Vulns")]
    vulnerabilities: usize,
    #[tabled(rename = "Path")]
    path: String,
}

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Fixed In")]
    fixed_in: String,
}

pub fn print_cli_table(report: &StatusReport) -> Result<()> {
    println!();
    println!(
        "Status as of: {}",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    if report.projects.is_empty() {
        println!("No projects with requirement files found.");
    } else {
        println!("Watching {} projects:", report.projects.len());
        println!();

        let rows: Vec<ProjectRow> = report.projects.iter().map(project_row).collect();
        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    let mut vulns: Vec<(&Project, &Vulnerability)> = report
        .projects
        .iter()
        .flat_map(|p| {
            p.manifests()
                .iter()
                .flat_map(move |m| m.vulnerabilities.iter().map(move |v| (p, v)))
        })
        .collect();

    if !vulns.is_empty() {
        println!();
        println!("Found {} vulnerabilities:", vulns.len());
        println!();

        vulns.sort_by_key(|(_, v)| severity_rank(v.severity));

        let rows: Vec<VulnRow> = vulns
            .iter()
            .map(|(p, v)| VulnRow {
                severity: format_severity(&v.severity),
                project: truncate(&p.name, 24),
                package: format!("{}=={}", v.package, v.version),
                id: v.id.clone(),
                title: truncate(&v.title, 50),
                fixed_in: v.fixed_version.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    println!();
    print_summary(report);

    Ok(())
}

/// One status line for a live event, as printed by `watch`.
pub fn format_event(event: &StatusEvent) -> String {
    match event {
        StatusEvent::Project(project) => {
            let vulns = project
                .manifests()
                .iter()
                .map(|m| m.vulnerabilities.len())
                .sum::<usize>();
            format!(
                "{} {} ({} manifests, {} vulnerabilities)",
                format_status(project.status),
                project.name,
                project.manifests().len(),
                vulns
            )
        }
        StatusEvent::Manifest(manifest) => format!(
            "  {} {}",
            format_status(manifest.status),
            manifest.path.display()
        ),
        StatusEvent::Aggregate(status) => format!("Overall: {}", format_status(*status)),
    }
}

fn project_row(project: &Project) -> ProjectRow {
    let manifests = project.manifests();
    ProjectRow {
        status: format_status(project.status),
        name: truncate(&project.name, 30),
        manifests: manifests.len(),
        packages: manifests.iter().map(|m| m.packages.len()).sum(),
        vulnerabilities: manifests.iter().map(|m| m.vulnerabilities.len()).sum(),
        path: truncate(&project.path.display().to_string(), 50),
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Critical => 0,
        Severity::High => 1,
        Severity::Medium => 2,
        Severity::Low => 3,
        Severity::Unknown => 4,
    }
}

fn format_status(status: Status) -> String {
    match status {
        Status::Insecure => "\x1b[31mINSECURE\x1b[0m".to_string(),
        Status::Secure => "\x1b[32mSECURE\x1b[0m".to_string(),
        Status::Unknown => "UNKNOWN".to_string(),
    }
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Unknown => "UNKNOWN".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_summary(report: &StatusReport) {
    let count = |status: Status| report.projects.iter().filter(|p| p.status == status).count();

    let mut by_severity = [0usize; 5];
    for project in &report.projects {
        for manifest in project.manifests() {
            for vuln in &manifest.vulnerabilities {
                by_severity[severity_rank(vuln.severity) as usize] += 1;
            }
        }
    }

    println!("Summary:");
    println!(
        "  Projects: {} insecure, {} secure, {} unknown",
        count(Status::Insecure),
        count(Status::Secure),
        count(Status::Unknown)
    );

    if report.vulnerability_count() > 0 {
        println!(
            "  Vulnerabilities: {} critical, {} high, {} medium, {} low, {} unrated",
            by_severity[0], by_severity[1], by_severity[2], by_severity[3], by_severity[4]
        );
    }

    println!();
    println!("Overall: {}", format_status(report.aggregate));
}
