//! JavaScript installed into every Chromium session.

/// Installed before any page script runs.
///
/// Adds the DOM helpers spec tooling calls unconditionally, each only when
/// the environment lacks it, normalizes `fetch()` inputs against the document
/// base, and registers the ReSpec completion hook in `window.__specResolver`.
pub const SESSION_INIT: &str = r#"(() => {
  if (window.__specResolver) return;

  const proto = Element.prototype;
  if (!proto.insertAdjacentElement) {
    proto.insertAdjacentElement = function (position, element) {
      switch (String(position).toLowerCase()) {
        case 'beforebegin':
          return this.parentNode ? this.parentNode.insertBefore(element, this) : null;
        case 'afterbegin':
          return this.insertBefore(element, this.firstChild);
        case 'beforeend':
          return this.appendChild(element);
        case 'afterend':
          return this.parentNode ? this.parentNode.insertBefore(element, this.nextSibling) : null;
        default:
          throw new SyntaxError('invalid position: ' + position);
      }
    };
  }
  if (!proto.closest) {
    proto.closest = function (selector) {
      for (let el = this; el && el.nodeType === 1; el = el.parentElement) {
        if (el.matches(selector)) return el;
      }
      return null;
    };
  }
  if (window.Attr && !Object.prototype.hasOwnProperty.call(Attr.prototype, 'cloneNode')) {
    const cloneNode = Node.prototype.cloneNode;
    Attr.prototype.cloneNode = function (deep) {
      if (!this.ownerDocument) return this;
      try {
        return cloneNode.call(this, deep);
      } catch (e) {
        return this;
      }
    };
  }
  if (!window.matchMedia) {
    window.matchMedia = (media) => ({
      matches: false,
      media: String(media || ''),
      onchange: null,
      addListener() {},
      removeListener() {},
      addEventListener() {},
      removeEventListener() {},
      dispatchEvent() { return false; },
    });
  }
  for (const name of ['scrollTo', 'scrollBy', 'scroll']) {
    if (!window[name]) window[name] = () => {};
  }
  if (!proto.scrollIntoView) proto.scrollIntoView = function () {};

  if (window.fetch) {
    const nativeFetch = window.fetch.bind(window);
    window.fetch = (input, init) =>
      nativeFetch(typeof input === 'string' ? new URL(input, document.baseURI).href : input, init);
  }

  const state = { done: false, hooked: false, waiters: [] };
  state.finish = () => {
    if (state.done) return;
    state.done = true;
    state.waiters.splice(0).forEach((resolve) => resolve(true));
  };
  state.hook = () => {
    const config = window.respecConfig;
    if (state.hooked || !config) return;
    state.hooked = true;
    if (!Array.isArray(config.postProcess)) {
      config.postProcess = config.postProcess ? [config.postProcess] : [];
    }
    config.postProcess.push(() => state.finish());
  };
  window.__specResolver = state;
  document.addEventListener('DOMContentLoaded', state.hook);
})();"#;

/// Evaluated with `awaitPromise`: settles once ReSpec's ready promise
/// resolves or the post-process hook runs, whichever comes first.
pub const ENGINE_READY: &str = r#"new Promise((resolve) => {
  const state = window.__specResolver;
  if (!state) return resolve(false);
  if (state.done) return resolve(true);
  state.waiters.push(resolve);
  state.hook();
  const ready = (document.respec && document.respec.ready) || document.respecIsReady;
  if (ready && typeof ready.then === 'function') {
    ready.then(state.finish, state.finish);
  }
})"#;

/// True once a script, inline or external, has defined `respecConfig`.
pub const DECLARES_ENGINE_CONFIG: &str = "typeof window.respecConfig !== 'undefined'";

/// Serialized document markup.
pub const OUTER_HTML: &str = "document.documentElement.outerHTML";
