//! Text format parser.
//!
//! Parsing happens in two phases. The chumsky grammar below turns the text
//! into a raw syntax tree that still refers to values by name; the builder
//! then allocates values function by function, resolves names (forward
//! references are accepted and left for the verifier), checks operand type
//! annotations against the defining types and attaches source locations.
use std::collections::{BTreeSet, HashMap};

use chumsky::{prelude::*, text::digits};

use crate::{
    modules::{
        Function, Module, Region, Visibility,
        attributes::{Attribute, ComparisonDirection, DenseElements},
        operation::{KNOWN_DIALECTS, OpKind, Operation},
        value::{Location, ValueId},
    },
    types::{
        Dim, Shape, TensorType, Type,
        primary::{ElementType, FloatType, IntType, Signedness},
    },
    utils::{Error, ParserError},
};

type Spanned<'src> = (&'src str, SimpleSpan);

struct RawRegion<'src> {
    arguments: Vec<(Spanned<'src>, Type)>,
    operations: Vec<RawOp<'src>>,
}

struct RawOp<'src> {
    results: Vec<Spanned<'src>>,
    name: Spanned<'src>,
    operands: Vec<Spanned<'src>>,
    regions: Vec<RawRegion<'src>>,
    attributes: Vec<(&'src str, Attribute)>,
    operand_types: Vec<Type>,
    result_types: Vec<Type>,
    location: Option<Location>,
    span: SimpleSpan,
}

struct RawFunction<'src> {
    visibility: Visibility,
    name: Spanned<'src>,
    arguments: Vec<(Spanned<'src>, Type)>,
    result_types: Vec<Type>,
    location: Option<Location>,
    body: Vec<RawOp<'src>>,
    span: SimpleSpan,
}

#[derive(Clone)]
enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Whitespace and `//` line comments.
pub fn whitespace<'src>() -> impl Parser<'src, &'src str, (), extra::Err<Rich<'src, char>>> + Clone
{
    let comment = just("//")
        .then(any().filter(|c: &char| *c != '\n').repeated())
        .ignored();
    choice((any().filter(|c: &char| c.is_whitespace()).ignored(), comment))
        .repeated()
        .ignored()
}

fn list<'src, T>(
    item: impl Parser<'src, &'src str, T, extra::Err<Rich<'src, char>>> + Clone,
    open: char,
    close: char,
) -> impl Parser<'src, &'src str, Vec<T>, extra::Err<Rich<'src, char>>> + Clone {
    item.padded_by(whitespace())
        .separated_by(just(','))
        .collect::<Vec<_>>()
        .then_ignore(whitespace())
        .delimited_by(just(open), just(close))
}

fn identifier_char(c: &char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

pub fn integer_parser<'src>()
-> impl Parser<'src, &'src str, i64, extra::Err<Rich<'src, char>>> + Clone {
    just('-')
        .or_not()
        .then(digits(10))
        .to_slice()
        .try_map(|digits: &str, span| {
            digits
                .parse::<i64>()
                .map_err(|_| Rich::custom(span, format!("integer literal out of range: {}", digits)))
        })
        .labelled("integer")
}

pub fn element_type_parser<'src>()
-> impl Parser<'src, &'src str, ElementType, extra::Err<Rich<'src, char>>> + Clone {
    let width = digits(10).to_slice().try_map(|digits: &str, span| {
        digits
            .parse::<u32>()
            .map_err(|_| Rich::custom(span, format!("invalid integer type width: {}", digits)))
    });

    let int = choice((
        just("si").to(Signedness::Signed),
        just("ui").to(Signedness::Unsigned),
        just("i").to(Signedness::Signless),
    ))
    .then(width)
    .try_map(|(signedness, width), span| {
        IntType::new(width, signedness)
            .map(ElementType::Int)
            .ok_or_else(|| {
                Rich::custom(
                    span,
                    format!(
                        "unsupported integer width {} (expected one of {:?})",
                        width,
                        IntType::SUPPORTED_WIDTHS
                    ),
                )
            })
    })
    .labelled("integer type");

    let float = choice((
        just("f16").to(FloatType::F16),
        just("bf16").to(FloatType::BF16),
        just("f32").to(FloatType::F32),
        just("f64").to(FloatType::F64),
    ))
    .map(ElementType::Float)
    .labelled("floating-point type");

    choice((int, float)).labelled("element type")
}

pub fn type_parser<'src>()
-> impl Parser<'src, &'src str, Type, extra::Err<Rich<'src, char>>> + Clone {
    let dim = choice((
        just('?').to(Dim::Dynamic),
        digits(10).to_slice().try_map(|digits: &str, span| {
            digits
                .parse::<i64>()
                .map(Dim::Static)
                .map_err(|_| Rich::custom(span, format!("invalid dimension size: {}", digits)))
        }),
    ))
    .labelled("dimension");

    let ranked = dim
        .then_ignore(just('x'))
        .repeated()
        .collect::<Vec<_>>()
        .then(element_type_parser())
        .map(|(dims, element)| TensorType {
            element,
            shape: Shape::Ranked(dims),
        });

    let unranked = just("*x")
        .ignore_then(element_type_parser())
        .map(TensorType::unranked);

    let tensor = just("tensor")
        .ignore_then(choice((unranked, ranked)).delimited_by(just('<'), just('>')))
        .map(Type::Tensor)
        .labelled("tensor type");

    choice((tensor, just("!stablehlo.token").to(Type::Token))).labelled("type")
}

fn value_name<'src>()
-> impl Parser<'src, &'src str, Spanned<'src>, extra::Err<Rich<'src, char>>> + Clone {
    just('%')
        .ignore_then(any().filter(identifier_char).repeated().at_least(1).to_slice())
        .map_with(|name, e| (name, e.span()))
        .labelled("value name")
}

fn symbol_name<'src>()
-> impl Parser<'src, &'src str, Spanned<'src>, extra::Err<Rich<'src, char>>> + Clone {
    just('@')
        .ignore_then(any().filter(identifier_char).repeated().at_least(1).to_slice())
        .map_with(|name, e| (name, e.span()))
        .labelled("symbol name")
}

fn location_parser<'src>()
-> impl Parser<'src, &'src str, Location, extra::Err<Rich<'src, char>>> + Clone {
    let number = digits(10).to_slice().try_map(|digits: &str, span| {
        digits
            .parse::<u32>()
            .map_err(|_| Rich::custom(span, format!("invalid location: {}", digits)))
    });

    let line_col = number
        .clone()
        .then_ignore(just(':'))
        .then(number)
        .map(|(line, column)| Location::LineCol { line, column });

    just("loc")
        .ignore_then(whitespace())
        .ignore_then(
            choice((just("unknown").to(Location::Unknown), line_col))
                .padded_by(whitespace())
                .delimited_by(just('('), just(')')),
        )
        .labelled("location")
}

fn dense_parser<'src>()
-> impl Parser<'src, &'src str, DenseElements, extra::Err<Rich<'src, char>>> + Clone {
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(digits(10));
    let number = just('-')
        .or_not()
        .then(digits(10))
        .then(just('.').then(digits(10).or_not()).or_not())
        .then(exponent.or_not())
        .to_slice()
        .try_map(|literal: &str, span| {
            if literal.contains(['.', 'e', 'E']) {
                literal
                    .parse::<f64>()
                    .map(Scalar::Float)
                    .map_err(|_| Rich::custom(span, format!("invalid float literal: {}", literal)))
            } else {
                literal.parse::<i64>().map(Scalar::Int).map_err(|_| {
                    Rich::custom(span, format!("integer literal out of range: {}", literal))
                })
            }
        });

    let scalar = choice((
        just("true").to(Scalar::Bool(true)),
        just("false").to(Scalar::Bool(false)),
        just("NaN").to(Scalar::Float(f64::NAN)),
        just("-inf").to(Scalar::Float(f64::NEG_INFINITY)),
        just("inf").to(Scalar::Float(f64::INFINITY)),
        number,
    ))
    .labelled("dense element");

    let elements = recursive(|nested| {
        choice((
            scalar.map(|s| vec![s]),
            list(nested, '[', ']').map(|groups: Vec<Vec<Scalar>>| groups.concat()),
        ))
    });

    just("dense")
        .ignore_then(
            elements
                .padded_by(whitespace())
                .delimited_by(just('<'), just('>')),
        )
        .try_map(|scalars, span| {
            let all_bools = scalars.iter().all(|s| matches!(s, Scalar::Bool(_)));
            let any_bool = scalars.iter().any(|s| matches!(s, Scalar::Bool(_)));
            let any_float = scalars.iter().any(|s| matches!(s, Scalar::Float(_)));

            if !scalars.is_empty() && all_bools {
                Ok(DenseElements::Bools(
                    scalars
                        .iter()
                        .map(|s| matches!(s, Scalar::Bool(true)))
                        .collect(),
                ))
            } else if any_bool {
                Err(Rich::custom(
                    span,
                    "dense attribute mixes boolean and numeric elements",
                ))
            } else if any_float {
                Ok(DenseElements::Floats(
                    scalars
                        .iter()
                        .map(|s| match s {
                            Scalar::Int(v) => *v as f64,
                            Scalar::Float(v) => *v,
                            Scalar::Bool(_) => 0.0,
                        })
                        .collect(),
                ))
            } else {
                Ok(DenseElements::Ints(
                    scalars
                        .iter()
                        .map(|s| match s {
                            Scalar::Int(v) => *v,
                            _ => 0,
                        })
                        .collect(),
                ))
            }
        })
        .labelled("dense attribute")
}

pub fn attribute_parser<'src>()
-> impl Parser<'src, &'src str, Attribute, extra::Err<Rich<'src, char>>> + Clone {
    let escape = just('\\').ignore_then(choice((
        just('"'),
        just('\\'),
        just('n').to('\n'),
        just('t').to('\t'),
    )));
    let string = none_of("\"\\")
        .or(escape)
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'))
        .map(Attribute::Str)
        .labelled("string attribute");

    let array = just("array<i64")
        .ignore_then(
            just(':')
                .padded_by(whitespace())
                .ignore_then(
                    integer_parser()
                        .padded_by(whitespace())
                        .separated_by(just(','))
                        .at_least(1)
                        .collect::<Vec<_>>(),
                )
                .or_not(),
        )
        .then_ignore(whitespace())
        .then_ignore(just('>'))
        .map(|values| Attribute::Array(values.unwrap_or_default()))
        .labelled("array attribute");

    let comparison = just("#stablehlo<comparison_direction")
        .ignore_then(whitespace())
        .ignore_then(text::ascii::ident())
        .then_ignore(whitespace())
        .then_ignore(just('>'))
        .try_map(|direction: &str, span| {
            direction
                .parse::<ComparisonDirection>()
                .map(Attribute::ComparisonDirection)
                .map_err(|_| {
                    Rich::custom(span, format!("unknown comparison direction: {}", direction))
                })
        })
        .labelled("comparison direction");

    let symbol = symbol_name().map(|(name, _)| Attribute::Symbol(name.to_string()));

    let boolean = choice((
        just("true").to(Attribute::Bool(true)),
        just("false").to(Attribute::Bool(false)),
    ));

    // `2 : i32` is accepted; the integer type is not retained.
    let int = integer_parser()
        .then_ignore(
            whitespace()
                .then(just(':'))
                .then(whitespace())
                .then(element_type_parser())
                .or_not(),
        )
        .map(Attribute::Int);

    choice((
        string,
        dense_parser().map(Attribute::Dense),
        array,
        comparison,
        symbol,
        boolean,
        int,
    ))
    .labelled("attribute")
}

fn attribute_dict_parser<'src>()
-> impl Parser<'src, &'src str, Vec<(&'src str, Attribute)>, extra::Err<Rich<'src, char>>> + Clone
{
    let name = any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
        .repeated()
        .at_least(1)
        .to_slice()
        .labelled("attribute name");

    list(
        name.then_ignore(just('=').padded_by(whitespace()))
            .then(attribute_parser()),
        '{',
        '}',
    )
}

fn function_type_parser<'src>()
-> impl Parser<'src, &'src str, (Vec<Type>, Vec<Type>), extra::Err<Rich<'src, char>>> + Clone {
    list(type_parser(), '(', ')')
        .then_ignore(just("->").padded_by(whitespace()))
        .then(choice((
            list(type_parser(), '(', ')'),
            type_parser().map(|ty| vec![ty]),
        )))
        .labelled("function type")
}

fn operation_parser<'src>()
-> impl Parser<'src, &'src str, RawOp<'src>, extra::Err<Rich<'src, char>>> + Clone {
    recursive(|op| {
        let block_argument = value_name()
            .then_ignore(just(':').padded_by(whitespace()))
            .then(type_parser());

        let block_header = just('^')
            .ignore_then(any().filter(identifier_char).repeated().at_least(1))
            .ignore_then(list(block_argument, '(', ')').or_not())
            .then_ignore(just(':').padded_by(whitespace()))
            .map(Option::unwrap_or_default)
            .labelled("block header");

        let region = just('{')
            .ignore_then(whitespace())
            .ignore_then(block_header.or_not().map(Option::unwrap_or_default))
            .then(op.padded_by(whitespace()).repeated().collect::<Vec<_>>())
            .then_ignore(whitespace())
            .then_ignore(just('}'))
            .map(|(arguments, operations)| RawRegion {
                arguments,
                operations,
            })
            .labelled("region");

        let results = value_name()
            .padded_by(whitespace())
            .separated_by(just(','))
            .at_least(1)
            .collect::<Vec<_>>()
            .then_ignore(just('='));

        let op_name = any()
            .filter(|c: &char| *c != '"')
            .repeated()
            .at_least(1)
            .to_slice()
            .delimited_by(just('"'), just('"'))
            .map_with(|name, e| (name, e.span()))
            .labelled("operation name");

        results
            .or_not()
            .map(Option::unwrap_or_default)
            .then_ignore(whitespace())
            .then(op_name)
            .then_ignore(whitespace())
            .then(list(value_name(), '(', ')'))
            .then_ignore(whitespace())
            .then(list(region, '(', ')').or_not().map(Option::unwrap_or_default))
            .then_ignore(whitespace())
            .then(attribute_dict_parser().or_not().map(Option::unwrap_or_default))
            .then_ignore(just(':').padded_by(whitespace()))
            .then(function_type_parser())
            .then(whitespace().ignore_then(location_parser()).or_not())
            .map_with(
                |(
                    (((((results, name), operands), regions), attributes), (operand_types, result_types)),
                    location,
                ),
                 e| RawOp {
                    results,
                    name,
                    operands,
                    regions,
                    attributes,
                    operand_types,
                    result_types,
                    location,
                    span: e.span(),
                },
            )
            .labelled("operation")
            .boxed()
    })
}

fn function_parser<'src>()
-> impl Parser<'src, &'src str, RawFunction<'src>, extra::Err<Rich<'src, char>>> + Clone {
    let visibility = choice((
        just("public").to(Visibility::Public),
        just("private").to(Visibility::Private),
    ))
    .labelled("visibility");

    let argument = value_name()
        .then_ignore(just(':').padded_by(whitespace()))
        .then(type_parser());

    let results = just("->").ignore_then(whitespace()).ignore_then(choice((
        list(type_parser(), '(', ')'),
        type_parser().map(|ty| vec![ty]),
    )));

    let body = operation_parser()
        .padded_by(whitespace())
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(whitespace())
        .delimited_by(just('{'), just('}'));

    just("func.func")
        .ignore_then(whitespace())
        .ignore_then(visibility.then_ignore(whitespace()).or_not())
        .then(symbol_name())
        .then_ignore(whitespace())
        .then(list(argument, '(', ')'))
        .then_ignore(whitespace())
        .then(results.or_not().map(Option::unwrap_or_default))
        .then(whitespace().ignore_then(location_parser()).or_not())
        .then_ignore(whitespace())
        .then(body)
        .map_with(
            |(((((visibility, name), arguments), result_types), location), body), e| RawFunction {
                visibility: visibility.unwrap_or_default(),
                name,
                arguments,
                result_types,
                location,
                body,
                span: e.span(),
            },
        )
        .labelled("function")
}

fn module_parser<'src>() -> impl Parser<
    'src,
    &'src str,
    (Option<&'src str>, Vec<RawFunction<'src>>),
    extra::Err<Rich<'src, char>>,
> {
    let functions = function_parser()
        .padded_by(whitespace())
        .repeated()
        .collect::<Vec<_>>();

    let wrapped = just("module")
        .ignore_then(whitespace())
        .ignore_then(symbol_name().then_ignore(whitespace()).or_not())
        .then(
            functions
                .clone()
                .then_ignore(whitespace())
                .delimited_by(just('{'), just('}')),
        )
        .map(|(name, functions)| (name.map(|(name, _)| name), functions));

    choice((wrapped, functions.map(|functions| (None, functions))))
        .padded_by(whitespace())
        .then_ignore(end())
}

/// Resolves a raw syntax tree into a [`Module`].
struct Builder<'src> {
    line_starts: Vec<usize>,
    errors: Vec<ParserError>,
    names: HashMap<&'src str, ValueId>,
}

impl<'src> Builder<'src> {
    fn new(source: &'src str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            line_starts,
            errors: Vec::new(),
            names: HashMap::new(),
        }
    }

    fn location(&self, span: SimpleSpan) -> Location {
        let line = self.line_starts.partition_point(|start| *start <= span.start);
        let column = span.start - self.line_starts[line.saturating_sub(1)] + 1;
        Location::LineCol {
            line: line as u32,
            column: column as u32,
        }
    }

    fn error(&mut self, span: SimpleSpan, message: String) {
        self.errors.push(ParserError {
            start: span.start,
            end: span.end,
            message,
        });
    }

    fn build_module(&mut self, name: Option<&'src str>, raw: Vec<RawFunction<'src>>) -> Module {
        let mut seen = BTreeSet::new();
        let mut functions = Vec::with_capacity(raw.len());
        for function in raw {
            if !seen.insert(function.name.0) {
                self.error(
                    function.name.1,
                    format!("redefinition of symbol named '{}'", function.name.0),
                );
            }
            functions.push(self.build_function(function));
        }

        Module {
            name: name.map(str::to_string),
            functions,
        }
    }

    fn build_function(&mut self, raw: RawFunction<'src>) -> Function {
        self.names.clear();
        let mut function = Function::new(raw.name.0, [], raw.result_types);
        function.visibility = raw.visibility;
        function.location = raw.location.unwrap_or_else(|| self.location(raw.span));

        // 1. Allocate every value so that forward references resolve.
        for (name, ty) in &raw.arguments {
            self.declare(&mut function, *name, ty.clone());
        }
        for op in &raw.body {
            self.declare_op(&mut function, op);
        }

        // 2. Build the operations.
        let arguments = raw
            .arguments
            .iter()
            .filter_map(|((name, _), _)| self.names.get(name).copied())
            .collect();
        let operations = raw
            .body
            .into_iter()
            .map(|op| self.build_op(&function, op))
            .collect();
        function.body = Region {
            arguments,
            operations,
        };
        function
    }

    fn declare(&mut self, function: &mut Function, (name, span): Spanned<'src>, ty: Type) {
        if self.names.contains_key(name) {
            self.error(span, format!("redefinition of SSA value '%{}'", name));
            return;
        }
        let id = function.new_value(ty);
        self.names.insert(name, id);
    }

    fn declare_op(&mut self, function: &mut Function, op: &RawOp<'src>) {
        if op.results.len() != op.result_types.len() {
            self.error(
                op.span,
                format!(
                    "operation defines {} results but was provided {} to bind",
                    op.result_types.len(),
                    op.results.len()
                ),
            );
        }
        for (name, ty) in op.results.iter().zip(&op.result_types) {
            self.declare(function, *name, ty.clone());
        }
        for region in &op.regions {
            for (name, ty) in &region.arguments {
                self.declare(function, *name, ty.clone());
            }
            for nested in &region.operations {
                self.declare_op(function, nested);
            }
        }
    }

    fn resolve(&mut self, function: &Function, (name, span): Spanned<'src>) -> Option<ValueId> {
        let resolved = self.names.get(name).copied();
        if resolved.is_none() {
            self.error(span, format!("use of undeclared SSA value name '%{}'", name));
        }
        resolved.filter(|id| id.index() < function.values.len())
    }

    fn build_op(&mut self, function: &Function, raw: RawOp<'src>) -> Operation {
        let (name, name_span) = raw.name;
        let kind = match OpKind::from_name(name) {
            Some(kind) => kind,
            None => {
                let dialect = name.split_once('.').map(|(d, _)| d).unwrap_or(name);
                if KNOWN_DIALECTS.contains(&dialect) {
                    self.error(name_span, format!("unknown operation '{}'", name));
                } else {
                    self.error(
                        name_span,
                        format!("dialect '{}' of operation '{}' is not recognized", dialect, name),
                    );
                }
                OpKind::Unregistered(name.to_string())
            }
        };

        if raw.operands.len() != raw.operand_types.len() {
            self.error(
                raw.span,
                format!(
                    "expected {} operand types but had {}",
                    raw.operands.len(),
                    raw.operand_types.len()
                ),
            );
        }

        let mut operands = Vec::with_capacity(raw.operands.len());
        for (i, operand) in raw.operands.iter().enumerate() {
            let Some(id) = self.resolve(function, *operand) else {
                continue;
            };
            if let Some(annotated) = raw.operand_types.get(i) {
                let defined = function.value_type(id);
                if defined != annotated {
                    self.error(
                        operand.1,
                        format!(
                            "use of value '%{}' expects different type than prior uses: '{}' vs '{}'",
                            operand.0, annotated, defined
                        ),
                    );
                }
            }
            operands.push(id);
        }

        let mut attributes = std::collections::BTreeMap::new();
        for (attr_name, value) in raw.attributes {
            if attributes.insert(attr_name.to_string(), value).is_some() {
                self.error(
                    raw.span,
                    format!(
                        "attribute '{}' occurs more than once in the attribute list",
                        attr_name
                    ),
                );
            }
        }

        let results = raw
            .results
            .iter()
            .filter_map(|(name, _)| self.names.get(name).copied())
            .collect();

        let regions = raw
            .regions
            .into_iter()
            .map(|region| Region {
                arguments: region
                    .arguments
                    .iter()
                    .filter_map(|((name, _), _)| self.names.get(name).copied())
                    .collect(),
                operations: region
                    .operations
                    .into_iter()
                    .map(|op| self.build_op(function, op))
                    .collect(),
            })
            .collect();

        let location = raw.location.unwrap_or_else(|| self.location(raw.span));
        Operation {
            kind,
            operands,
            results,
            attributes,
            regions,
            location,
        }
    }
}

fn convert_errors(errors: Vec<Rich<'_, char>>) -> Vec<ParserError> {
    errors
        .into_iter()
        .map(|error| ParserError {
            start: error.span().start,
            end: error.span().end,
            message: error.to_string(),
        })
        .collect()
}

/// Parse a module from its text form.
pub fn parse_module(source: &str) -> Result<Module, Error> {
    let (name, functions) = module_parser()
        .parse(source)
        .into_result()
        .map_err(|errors| Error::ParserErrors {
            errors: convert_errors(errors),
        })?;

    let mut builder = Builder::new(source);
    let module = builder.build_module(name, functions);
    if builder.errors.is_empty() {
        log::debug!(
            "parsed module with {} function(s)",
            module.functions.len()
        );
        Ok(module)
    } else {
        Err(Error::ParserErrors {
            errors: builder.errors,
        })
    }
}

/// Parse a single type, e.g. `tensor<2x?xi32>`.
pub fn parse_type(source: &str) -> Result<Type, Error> {
    type_parser()
        .padded_by(whitespace())
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errors| Error::ParserErrors {
            errors: convert_errors(errors),
        })
}

/// Render parser errors as annotated source excerpts.
pub fn render_errors(source: &str, errors: &[ParserError]) -> String {
    use ariadne::{Config, IndexType, Label, Report, ReportKind, Source};

    let mut rendered = Vec::new();
    for error in errors {
        let span = error.start..error.end.max(error.start);
        let written = Report::build(ReportKind::Error, span.clone())
            .with_config(
                Config::default()
                    .with_color(false)
                    .with_index_type(IndexType::Byte),
            )
            .with_message(&error.message)
            .with_label(Label::new(span).with_message(&error.message))
            .finish()
            .write(Source::from(source), &mut rendered);
        if written.is_err() {
            rendered.extend_from_slice(format!("{}\n", error).as_bytes());
        }
    }
    String::from_utf8_lossy(&rendered).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tensor_types() {
        assert_eq!(
            parse_type("tensor<2x?xi32>").unwrap(),
            Type::Tensor(TensorType::new(
                IntType::I32,
                [Dim::Static(2), Dim::Dynamic]
            ))
        );
        assert_eq!(
            parse_type("tensor<i1>").unwrap(),
            Type::Tensor(TensorType::scalar(IntType::I1))
        );
        assert_eq!(
            parse_type("tensor<*xf32>").unwrap(),
            Type::Tensor(TensorType::unranked(FloatType::F32))
        );
        assert_eq!(parse_type("!stablehlo.token").unwrap(), Type::Token);
        assert!(parse_type("tensor<2xi7>").is_err());
    }

    #[test]
    fn parses_attributes() {
        fn parse(s: &str) -> Result<Attribute, String> {
            attribute_parser()
                .then_ignore(end())
                .parse(s)
                .into_result()
                .map_err(|errors| format!("{:?}", errors))
        }
        assert_eq!(parse("\"a\\\"b\"").unwrap(), Attribute::Str("a\"b".into()));
        assert_eq!(parse("2 : i32").unwrap(), Attribute::Int(2));
        assert_eq!(parse("-7").unwrap(), Attribute::Int(-7));
        assert_eq!(parse("array<i64>").unwrap(), Attribute::Array(vec![]));
        assert_eq!(parse("array<i64: 0, 1>").unwrap(), Attribute::Array(vec![0, 1]));
        assert_eq!(
            parse("dense<[[1, 2], [3, 4]]>").unwrap(),
            Attribute::Dense(DenseElements::Ints(vec![1, 2, 3, 4]))
        );
        assert_eq!(
            parse("dense<true>").unwrap(),
            Attribute::Dense(DenseElements::Bools(vec![true]))
        );
        assert_eq!(
            parse("dense<[1, 2.5]>").unwrap(),
            Attribute::Dense(DenseElements::Floats(vec![1.0, 2.5]))
        );
        assert_eq!(
            parse("#stablehlo<comparison_direction LT>").unwrap(),
            Attribute::ComparisonDirection(ComparisonDirection::LT)
        );
        assert!(parse("dense<[true, 1]>").is_err());
    }

    #[test]
    fn records_line_and_column() {
        let module = parse_module(
            "func.func @f(%x: tensor<i64>) -> tensor<i64> {\n  \"func.return\"(%x) : (tensor<i64>) -> ()\n}",
        )
        .unwrap();
        let ret = &module.functions[0].body.operations[0];
        assert_eq!(ret.location, Location::LineCol { line: 2, column: 3 });
    }

    #[test]
    fn rejects_unknown_dialect() {
        let err = parse_module(
            "func.func @f() -> () {\n  \"mhlo.foo\"() : () -> ()\n  \"func.return\"() : () -> ()\n}",
        )
        .unwrap_err();
        let Error::ParserErrors { errors } = err else {
            panic!("expected parser errors");
        };
        assert!(errors[0].message.contains("dialect 'mhlo'"));
    }
}
