pub mod brainfuck;
pub mod clang;
pub mod go;
pub mod java;
pub mod swift;

pub use brainfuck::BrainfuckBackend;
pub use clang::ClangBackend;
pub use go::GoBackend;
pub use java::JavaBackend;
pub use swift::SwiftBackend;
