pub mod member;
pub mod secret_token;
pub mod contribution;
pub mod cause;
pub mod contribution_image;
pub mod cause_image;

pub use member::Entity as Member;
pub use secret_token::Entity as SecretToken;
pub use contribution::Entity as Contribution;
pub use cause::Entity as Cause;
pub use contribution_image::Entity as ContributionImage;
pub use cause_image::Entity as CauseImage;
