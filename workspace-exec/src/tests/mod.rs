//! Cross-module tests. Scenarios that need the .NET toolchain skip
//! themselves when `dotnet` is not installed.

mod fixtures;
mod utils;
