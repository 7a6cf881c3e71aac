//! Output generation for archived posts.
//!
//! - [`html`]: renders a post as a self-contained page and writes it to disk
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2024-03-01_First Post.html
//! ├── 2024-03-08_Second Post.html
//! └── ...
//! ```

pub mod html;
