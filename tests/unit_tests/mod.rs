mod calculus;
mod minimize;
mod newton;
mod pseudotime;
