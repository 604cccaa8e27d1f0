//! Pretty-print helpers for operations, functions and modules.
//!
//! The output is the generic operation syntax accepted by
//! [`parser::parse_module`](crate::modules::parser::parse_module), so
//! printing and re-parsing a module with sequentially numbered values
//! yields the same module.
use crate::modules::{Function, Module, Region, operation::Operation};

const INDENT: &str = "  ";

fn write_type_list(
    f: &mut std::fmt::Formatter<'_>,
    types: impl Iterator<Item = impl std::fmt::Display>,
) -> std::fmt::Result {
    for (i, ty) in types.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

impl Operation {
    /// Build a formatting helper that renders the operation using `function`
    /// for value types, indented by `depth` levels.
    pub fn fmt<'a>(&'a self, function: &'a Function, depth: usize) -> impl std::fmt::Display + 'a {
        struct Fmt<'a> {
            op: &'a Operation,
            function: &'a Function,
            depth: usize,
        }

        impl<'a> std::fmt::Display for Fmt<'a> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let op = self.op;
                write!(f, "{}", INDENT.repeat(self.depth))?;

                if !op.results.is_empty() {
                    for (i, result) in op.results.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", result)?;
                    }
                    write!(f, " = ")?;
                }

                write!(f, "\"{}\"(", op.name())?;
                for (i, operand) in op.operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")?;

                if !op.regions.is_empty() {
                    write!(f, " (")?;
                    for (i, region) in op.regions.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", region.fmt(self.function, self.depth))?;
                    }
                    write!(f, ")")?;
                }

                if !op.attributes.is_empty() {
                    write!(f, " {{")?;
                    for (i, (name, value)) in op.attributes.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{} = {}", name, value)?;
                    }
                    write!(f, "}}")?;
                }

                write!(f, " : (")?;
                write_type_list(
                    f,
                    op.operands.iter().map(|v| self.function.value_type(*v)),
                )?;
                write!(f, ") -> ")?;
                match op.results.as_slice() {
                    [single] => write!(f, "{}", self.function.value_type(*single))?,
                    results => {
                        write!(f, "(")?;
                        write_type_list(f, results.iter().map(|v| self.function.value_type(*v)))?;
                        write!(f, ")")?;
                    }
                }

                if op.location.is_known() {
                    write!(f, " {}", op.location)?;
                }
                Ok(())
            }
        }

        Fmt {
            op: self,
            function,
            depth,
        }
    }
}

impl Region {
    /// Render a nested region as `{ ^bb0(args): ops }`. The closing brace
    /// is aligned with the owning operation at `depth`.
    pub fn fmt<'a>(&'a self, function: &'a Function, depth: usize) -> impl std::fmt::Display + 'a {
        struct Fmt<'a> {
            region: &'a Region,
            function: &'a Function,
            depth: usize,
        }

        impl<'a> std::fmt::Display for Fmt<'a> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                writeln!(f, "{{")?;
                if !self.region.arguments.is_empty() {
                    write!(f, "{}^bb0(", INDENT.repeat(self.depth))?;
                    for (i, arg) in self.region.arguments.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}: {}", arg, self.function.value_type(*arg))?;
                    }
                    writeln!(f, "):")?;
                }
                for op in &self.region.operations {
                    writeln!(f, "{}", op.fmt(self.function, self.depth + 1))?;
                }
                write!(f, "{}}}", INDENT.repeat(self.depth))
            }
        }

        Fmt {
            region: self,
            function,
            depth,
        }
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depth = if f.alternate() { 1 } else { 0 };
        let indent = INDENT.repeat(depth);

        write!(f, "{}func.func {} @{}(", indent, self.visibility, self.name)?;
        for (i, arg) in self.arguments().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", arg, self.value_type(*arg))?;
        }
        write!(f, ") -> (")?;
        write_type_list(f, self.result_types.iter())?;
        write!(f, ")")?;
        if self.location.is_known() {
            write!(f, " {}", self.location)?;
        }
        writeln!(f, " {{")?;

        for op in &self.body.operations {
            writeln!(f, "{}", op.fmt(self, depth + 1))?;
        }
        write!(f, "{}}}", indent)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => writeln!(f, "module @{} {{", name)?,
            None => writeln!(f, "module {{")?,
        }
        for function in &self.functions {
            writeln!(f, "{:#}", function)?;
        }
        write!(f, "}}")
    }
}
