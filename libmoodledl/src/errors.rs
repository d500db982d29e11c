use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum MdlError {
    /// The portal answered the login form but the logged-in marker was missing.
    #[error("login failed, the portal did not accept the credentials")]
    Authentication,
    #[error("could not reach the portal to log in. {0}")]
    LoginConnectivity(String),
    #[error("connection lost while loading course page {url}. {message}")]
    CourseConnectivity { url: String, message: String },
    /// An activity page could not be loaded. Recorded, never fatal.
    #[error("error loading activity page {url}. {message}")]
    Fetch { url: String, message: String },
    /// A resource could not be saved. Recorded, never fatal.
    #[error("error downloading {url}. {message}")]
    Download { url: String, message: String },
    /// parameters are file path, additional error message
    #[error("{message} : {file_name}")]
    Write { file_name: String, message: String },
    #[error("Invalid url received : {0}")]
    InvalidUrl(String),
    #[error("error creating destination directory. {0}")]
    DestinationDirectory(String),
    #[error("an unknown error occurred. {0}")]
    UnknownError(String),
}

impl MdlError {
    /// Process exit status for an error that ended the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            MdlError::Authentication => 1,
            MdlError::LoginConnectivity(_) => 2,
            MdlError::CourseConnectivity { .. } => 3,
            _ => 4,
        }
    }
}
