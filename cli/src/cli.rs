use chrono::Local;
use clap::Parser;
use libmoodledl::{
    init_mirror, Credentials, MdlError, MirrorReport, MirrorRule, Update, DEFAULT_PORTAL_URL,
};
use owo_colors::{OwoColorize, Stream::Stdout};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::channel;
use url::Url;

const MAX_BUFFER_SIZE: usize = 100;
const EXIT_INPUT_ERROR: i32 = 4;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mirror your Moodle courses",
    long_about = "Logs in to a Moodle portal and downloads the files, folders, pages and \
    external links of every enrolled course. Anything not given as a flag is asked for."
)]
pub struct Cli {
    #[arg(long, default_value = DEFAULT_PORTAL_URL)]
    portal_url: Url,
    #[arg(short, long)]
    username: Option<String>,
    #[arg(short, long, help = "Directory the courses are downloaded into.")]
    output_directory: Option<PathBuf>,
    #[arg(long, help = "Timeout in seconds for every request after login.")]
    request_timeout: Option<u64>,
    #[arg(
        long,
        help = "Skip a course whose page can't be loaded instead of aborting the run."
    )]
    skip_unreachable_courses: bool,
}

fn prompt_line(label: &str) -> io::Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn prompt_password() -> io::Result<String> {
    if io::stdin().is_terminal() {
        rpassword::prompt_password("Password: ")
    } else {
        prompt_line("Password (visible): ")
    }
}

fn read_input(cli: &Cli) -> io::Result<(Credentials, PathBuf)> {
    println!("Please enter your login");
    let username = match &cli.username {
        Some(u) => u.clone(),
        None => prompt_line("Username: ")?,
    };
    let password = prompt_password()?;
    let output_directory = match &cli.output_directory {
        Some(dir) => dir.clone(),
        None => PathBuf::from(prompt_line("Download directory: ")?),
    };
    Ok((Credentials { username, password }, output_directory))
}

/// Runs the whole mirror and returns the process exit status.
pub async fn download(cli: Cli) -> i32 {
    println!("Downloader for {}", cli.portal_url);
    println!("{}\n", "-".repeat(15 + cli.portal_url.as_str().len()));

    let (credentials, output_directory) = match read_input(&cli) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("Could not read input. {}", e);
            return EXIT_INPUT_ERROR;
        }
    };

    let mut rule = MirrorRule::new(cli.portal_url.clone(), output_directory);
    rule.request_timeout = cli.request_timeout.map(Duration::from_secs);
    rule.skip_unreachable_courses = cli.skip_unreachable_courses;

    println!("Logging in...");
    let (tx, mut rx) = channel::<Update>(MAX_BUFFER_SIZE);
    let mirror = tokio::spawn(init_mirror(rule, credentials, tx));

    while let Some(update) = rx.recv().await {
        match update {
            Update::CourseUpdate(course) => {
                let header = format!(
                    "Course {}/{}: {}",
                    course.index, course.total, course.course_name
                );
                println!("\n\n{}", header.if_supports_color(Stdout, |t| t.bold()));
                println!("{}", "-".repeat(header.chars().count()));
            }
            Update::MessageUpdate(msg) => {
                let line = format!("{} | {}", msg.content, msg.resource_name);
                if msg.is_error {
                    println!("{}", line.if_supports_color(Stdout, |t| t.red()));
                } else {
                    println!("{}", line);
                }
            }
            Update::ProgressUpdate(progress) => {
                if progress.bytes_written >= progress.file_size {
                    println!(
                        "[Downloaded] {} {} bytes",
                        progress.resource_name, progress.file_size
                    )
                }
            }
        };
    }

    match mirror.await {
        Ok(Ok(report)) => {
            print_report(&report);
            0
        }
        Ok(Err(e)) => {
            print_fatal(&e);
            e.exit_code()
        }
        Err(e) => {
            eprintln!("Download task panicked. {}", e);
            MdlError::UnknownError(e.to_string()).exit_code()
        }
    }
}

fn print_fatal(e: &MdlError) {
    let msg = match e {
        MdlError::Authentication => "Login failed.".to_string(),
        MdlError::LoginConnectivity(_) => {
            "Could not connect to the portal.\nPlease check your internet connection and try again later."
                .to_string()
        }
        MdlError::CourseConnectivity { .. } => {
            "The connection was interrupted.\nPlease check your internet connection and try again later."
                .to_string()
        }
        other => other.to_string(),
    };
    println!("\n{}", msg.if_supports_color(Stdout, |t| t.red()));
}

fn print_report(report: &MirrorReport) {
    let elapsed = report.finished_at - report.started_at;
    println!(
        "\n\nDownloads finished at {}. {} file(s) from {} course(s) in {}s.",
        report.finished_at.with_timezone(&Local).format("%H:%M:%S"),
        report.downloaded,
        report.courses,
        elapsed.num_seconds()
    );
    if !report.failures.is_empty() {
        println!(
            "{}",
            "The following files could not be downloaded. Please download them manually!"
                .if_supports_color(Stdout, |t| t.yellow())
        );
        for failure in &report.failures {
            println!("-> {}", failure.source_location);
        }
    }
}
