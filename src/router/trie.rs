//! Path-segment routing trie with typed captures.

use crate::{
    http::types::{self, Method, METHOD_COUNT},
    router::context::{Capture, HandlerFn, MiddlewareFn},
    server::transport::Transport,
};
use memchr::memchr;
use tokio::net::TcpStream;

/// The routing table: a trie keyed by URL path segment.
///
/// Templates are plain paths whose segments may be typed parameters:
///
/// | Token | Matches | Capture |
/// |-------|---------|---------|
/// | `%i`  | fully-numeric segment, no superfluous leading zeros | integer |
/// | `%f`  | well-formed decimal segment | float |
/// | `%s`  | any segment | string |
/// | `%r`  | the whole unconsumed suffix, must be last | string |
///
/// Literal segments always win over parameters. Two templates sharing a
/// prefix share trie nodes; registering a different parameter type at a
/// position that already has one is a programming error and panics.
///
/// # Examples
/// ```
/// use zzz_web::{Handled, Context, Respond, Router, StatusCode};
///
/// fn hello<'p>(_ctx: &mut Context<'p>) -> Handled<'p> {
///     Ok(Respond::new().status(StatusCode::Ok).mime("text/html").body(b"Hello, World!").into())
/// }
///
/// fn greet<'p>(ctx: &mut Context<'p>) -> Handled<'p> {
///     let name = ctx.capture_str(0).unwrap_or("stranger");
///     let body = bumpalo::format!(in ctx.arena(), "Hello, {}!", name);
///     Ok(Respond::new().status(StatusCode::Ok).mime("text/plain").body(body.into_bump_str().as_bytes()).into())
/// }
///
/// let mut router: Router<()> = Router::new();
/// router.at("/").get(hello);
/// router.at("/hi/%s").get(greet);
/// ```
pub struct Router<S = (), T: Transport = TcpStream> {
    root: Node<S, T>,
}

impl<S, T: Transport> Router<S, T> {
    #[inline]
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    /// Returns the [`Route`] registered under `template`, creating the
    /// trie path on first use.
    ///
    /// # Panics
    ///
    /// - On a parameter type conflicting with one already registered at
    ///   the same position.
    /// - On segments following a `%r` tail.
    #[track_caller]
    pub fn at(&mut self, template: &str) -> &mut Route<S, T> {
        let node = Self::descend(&mut self.root, template);
        node.route.get_or_insert_with(Route::new)
    }

    /// Attaches `middleware` to every route at or below `prefix`, in
    /// registration order. The prefix uses the same template syntax as
    /// [`at`](Self::at).
    #[track_caller]
    pub fn middleware(&mut self, prefix: &str, middleware: MiddlewareFn<S, T>) {
        let node = Self::descend(&mut self.root, prefix);
        node.middlewares.push(middleware);
    }

    #[track_caller]
    fn descend<'r>(mut node: &'r mut Node<S, T>, template: &str) -> &'r mut Node<S, T> {
        let mut segments = template.split('/').filter(|s| !s.is_empty()).peekable();

        while let Some(segment) = segments.next() {
            node = match segment {
                "%i" => node.param_child(ParamKind::Int),
                "%f" => node.param_child(ParamKind::Float),
                "%s" => node.param_child(ParamKind::Str),
                "%r" => {
                    assert!(
                        segments.peek().is_none(),
                        "`%r` must be the last segment of a template"
                    );
                    &mut **node.rest.get_or_insert_with(|| Box::new(Node::new()))
                }
                literal => node.literal_child(literal),
            };
        }

        node
    }

    /// Descends the trie segment by segment, filling `captures` (bounded
    /// by `capture_max`) and accumulating middleware ancestors-first.
    /// Returns the matched route, or `None` for a miss.
    pub(crate) fn lookup<'r>(
        &'r self,
        path: &'static [u8],
        captures: &mut Vec<Capture>,
        capture_max: usize,
        middlewares: &mut Vec<MiddlewareFn<S, T>>,
    ) -> Option<&'r Route<S, T>> {
        let mut node = &self.root;
        middlewares.extend_from_slice(&node.middlewares);

        let mut position = 0;
        loop {
            while position < path.len() && path[position] == b'/' {
                position += 1;
            }
            if position >= path.len() {
                return node.route.as_ref();
            }

            let end = position
                + memchr(b'/', &path[position..]).unwrap_or(path.len() - position);
            let segment = &path[position..end];

            if let Some(child) = node.literal(segment) {
                node = child;
            } else if let Some((capture, child)) = node.match_param(segment) {
                if captures.len() >= capture_max {
                    return None;
                }
                captures.push(capture);
                node = child;
            } else if let Some(rest) = &node.rest {
                if captures.len() >= capture_max {
                    return None;
                }
                captures.push(Capture::Str(&path[position..]));
                middlewares.extend_from_slice(&rest.middlewares);
                return rest.route.as_ref();
            } else {
                return None;
            }

            middlewares.extend_from_slice(&node.middlewares);
            position = end;
        }
    }
}

impl<S, T: Transport> Default for Router<S, T> {
    fn default() -> Self {
        Self::new()
    }
}

// NODE

struct Node<S, T: Transport> {
    literals: Vec<(Box<[u8]>, Node<S, T>)>,
    param: Option<(ParamKind, Box<Node<S, T>>)>,
    rest: Option<Box<Node<S, T>>>,
    middlewares: Vec<MiddlewareFn<S, T>>,
    route: Option<Route<S, T>>,
}

impl<S, T: Transport> Node<S, T> {
    fn new() -> Self {
        Self {
            literals: Vec::new(),
            param: None,
            rest: None,
            middlewares: Vec::new(),
            route: None,
        }
    }

    #[inline]
    fn literal(&self, segment: &[u8]) -> Option<&Node<S, T>> {
        self.literals
            .iter()
            .find(|(name, _)| **name == *segment)
            .map(|(_, child)| child)
    }

    fn literal_child(&mut self, segment: &str) -> &mut Node<S, T> {
        if let Some(index) = self
            .literals
            .iter()
            .position(|(name, _)| **name == *segment.as_bytes())
        {
            return &mut self.literals[index].1;
        }

        self.literals
            .push((segment.as_bytes().into(), Node::new()));
        &mut self.literals.last_mut().unwrap().1
    }

    #[track_caller]
    fn param_child(&mut self, kind: ParamKind) -> &mut Node<S, T> {
        match &mut self.param {
            Some((existing, _)) => {
                assert!(
                    *existing == kind,
                    "conflicting parameter types at one position: {existing:?} vs {kind:?}"
                );
            }
            slot @ None => *slot = Some((kind, Box::new(Node::new()))),
        }
        &mut *self.param.as_mut().unwrap().1
    }

    #[inline]
    fn match_param(&self, segment: &'static [u8]) -> Option<(Capture, &Node<S, T>)> {
        let (kind, child) = self.param.as_ref()?;
        Some((kind.parse(segment)?, child.as_ref()))
    }
}

// PARAMETERS

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Int,
    Float,
    Str,
}

impl ParamKind {
    #[inline]
    fn parse(&self, segment: &'static [u8]) -> Option<Capture> {
        match self {
            ParamKind::Int => {
                if segment.is_empty()
                    || !segment.iter().all(u8::is_ascii_digit)
                    || (segment.len() > 1 && segment[0] == b'0')
                {
                    return None;
                }
                types::as_str(segment)?.parse().ok().map(Capture::Int)
            }
            ParamKind::Float => {
                if !is_decimal(segment) {
                    return None;
                }
                types::as_str(segment)?.parse().ok().map(Capture::Float)
            }
            ParamKind::Str => match segment.is_empty() {
                true => None,
                false => Some(Capture::Str(segment)),
            },
        }
    }
}

// digits, optionally followed by '.' and more digits
#[inline]
fn is_decimal(segment: &[u8]) -> bool {
    let (whole, fraction) = match memchr(b'.', segment) {
        Some(dot) => (&segment[..dot], Some(&segment[dot + 1..])),
        None => (segment, None),
    };

    if whole.is_empty() || !whole.iter().all(u8::is_ascii_digit) {
        return false;
    }
    match fraction {
        Some(digits) => !digits.is_empty() && digits.iter().all(u8::is_ascii_digit),
        None => true,
    }
}

// ROUTE

/// Per-method handler table of one trie node.
pub struct Route<S = (), T: Transport = TcpStream> {
    table: [Option<HandlerFn<S, T>>; METHOD_COUNT],
}

macro_rules! impl_route_methods {
    ($($fn_name:ident => $method:ident;)+) => {
        impl<S, T: Transport> Route<S, T> { $(
            #[doc = concat!("Registers the `", stringify!($method), "` handler for this path.")]
            #[inline(always)]
            pub fn $fn_name(&mut self, handler: HandlerFn<S, T>) -> &mut Self {
                self.table[Method::$method.index()] = Some(handler);
                self
            }
        )+ }
    };
}

impl_route_methods! {
    get => Get;
    put => Put;
    post => Post;
    head => Head;
    patch => Patch;
    delete => Delete;
    options => Options;
}

impl<S, T: Transport> Route<S, T> {
    #[inline]
    fn new() -> Self {
        Self {
            table: [None; METHOD_COUNT],
        }
    }

    #[inline(always)]
    pub(crate) fn handler(&self, method: Method) -> Option<HandlerFn<S, T>> {
        self.table[method.index()]
    }
}
